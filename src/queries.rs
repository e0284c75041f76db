// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cache-backed access to a resource.
//!
//! [`ResourceQueries<R>`] pairs a [`ResourceService<R>`] with the shared
//! [`QueryCache`] and fixes the key layout every resource uses:
//!
//! | query  | key                          |
//! |--------|------------------------------|
//! | list   | `R::NAME / list / {params}`  |
//! | detail | `R::NAME / detail / "id"`    |
//! | other  | `R::NAME / {sub_path}`       |
//!
//! Its mutations invalidate `R::NAME/list/*` and write the server's copy of
//! the record into the detail key, so a detail view updates without a
//! round trip while lists refetch.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::cache::{QueryCache, QueryObserver, QueryOptions, QuerySnapshot};
use crate::error::SyncError;
use crate::http::Paginated;
use crate::mutation::Mutation;
use crate::query_key::{KeyPrefix, QueryKey, OP_LIST};
use crate::resources::contracts::{Contract, SignatureInput};
use crate::resources::{ListParams, Resource, ResourceService};

/// Input of an update mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct Update<P> {
    pub id: String,
    pub patch: P,
}

/// Input of a domain action (`sign`, `void`, ...).
#[derive(Debug, Clone, PartialEq)]
pub struct ActionInput {
    pub id: String,
    pub body: Option<Value>,
}

impl ActionInput {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), body: None }
    }

    #[must_use]
    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// Input of a contract signing.
#[derive(Debug, Clone, PartialEq)]
pub struct SignContract {
    pub id: String,
    pub signature: SignatureInput,
}

pub struct ResourceQueries<R> {
    service: ResourceService<R>,
    cache: QueryCache,
}

impl<R> Clone for ResourceQueries<R> {
    fn clone(&self) -> Self {
        Self { service: self.service.clone(), cache: self.cache.clone() }
    }
}

impl<R: Resource> ResourceQueries<R> {
    pub fn new(service: ResourceService<R>, cache: QueryCache) -> Self {
        Self { service, cache }
    }

    pub fn service(&self) -> &ResourceService<R> {
        &self.service
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    pub fn list_key(params: &ListParams) -> QueryKey {
        QueryKey::new(R::NAME, OP_LIST, &params.to_key_value())
    }

    pub fn detail_key(id: &str) -> QueryKey {
        QueryKey::detail(R::NAME, id)
    }

    /// Every key of this resource.
    pub fn all() -> KeyPrefix {
        KeyPrefix::resource(R::NAME)
    }

    /// Every list key of this resource.
    pub fn lists() -> KeyPrefix {
        KeyPrefix::list(R::NAME)
    }

    pub async fn list(&self, params: &ListParams, options: &QueryOptions) -> QuerySnapshot<Paginated<R>> {
        let fetch = self.list_fetcher(params);
        self.cache.query(&Self::list_key(params), options, fetch).await
    }

    pub async fn detail(&self, id: &str, options: &QueryOptions) -> QuerySnapshot<R> {
        let fetch = self.detail_fetcher(id);
        self.cache.query(&Self::detail_key(id), options, fetch).await
    }

    /// Any other read below the collection (`stats`, `fraud/stats`).
    pub async fn custom<T>(&self, sub_path: &str, options: &QueryOptions) -> QuerySnapshot<T>
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        let service = self.service.clone();
        let path = sub_path.to_string();
        let key = QueryKey::new(R::NAME, sub_path, &Value::Null);
        self.cache
            .query(&key, options, move || {
                let service = service.clone();
                let path = path.clone();
                async move { service.fetch::<T>(&path, &[]).await }
            })
            .await
    }

    pub fn observe_list(&self, params: &ListParams, options: QueryOptions) -> QueryObserver<Paginated<R>> {
        QueryObserver::new(&self.cache, Self::list_key(params), options, self.list_fetcher(params))
    }

    /// Point a list observer at new params (page, filters, search).
    pub fn switch_list(&self, observer: &mut QueryObserver<Paginated<R>>, params: &ListParams) {
        observer.switch(Self::list_key(params), self.list_fetcher(params));
    }

    pub fn observe_detail(&self, id: &str, options: QueryOptions) -> QueryObserver<R> {
        QueryObserver::new(&self.cache, Self::detail_key(id), options, self.detail_fetcher(id))
    }

    /// `POST /{NAME}`. Lists go stale; the created record is cached as its
    /// detail.
    pub fn create_mutation<I>(&self) -> Mutation<I, R>
    where
        I: Serialize + Clone + Send + Sync + 'static,
    {
        let service = self.service.clone();
        Mutation::new(format!("{}.create", R::NAME), &self.cache, move |input: I| {
            let service = service.clone();
            async move { service.create(&input).await }
        })
        .invalidates(Self::lists())
        .patches(|_, created: &R| Some((Self::detail_key(created.id()), created.clone())))
    }

    /// `PUT /{NAME}/{id}`. Lists go stale; the detail takes the server's copy.
    pub fn update_mutation<P>(&self) -> Mutation<Update<P>, R>
    where
        P: Serialize + Clone + Send + Sync + 'static,
    {
        let service = self.service.clone();
        Mutation::new(format!("{}.update", R::NAME), &self.cache, move |input: Update<P>| {
            let service = service.clone();
            async move { service.update(&input.id, &input.patch).await }
        })
        .invalidates(Self::lists())
        .patches(|_, updated: &R| Some((Self::detail_key(updated.id()), updated.clone())))
    }

    /// `DELETE /{NAME}/{id}`. Lists go stale; the detail entry is dropped.
    pub fn remove_mutation(&self) -> Mutation<String, ()> {
        let service = self.service.clone();
        Mutation::new(format!("{}.remove", R::NAME), &self.cache, move |id: String| {
            let service = service.clone();
            async move { service.remove(&id).await }
        })
        .invalidates(Self::lists())
        .removes(|id: &String, _| Some(Self::detail_key(id)))
    }

    /// `POST /{NAME}/{id}/{action}` returning the updated record. The body is
    /// sent as is; actions with client-side checks have typed mutations
    /// (e.g. `sign_mutation` for contracts).
    pub fn action_mutation(&self, action: &str) -> Mutation<ActionInput, R> {
        let service = self.service.clone();
        let action_name = action.to_string();
        Mutation::new(format!("{}.{}", R::NAME, action), &self.cache, move |input: ActionInput| {
            let service = service.clone();
            let action = action_name.clone();
            async move { service.action(&input.id, &action, input.body.as_ref()).await }
        })
        .invalidates(Self::lists())
        .patches(|_, updated: &R| Some((Self::detail_key(updated.id()), updated.clone())))
    }

    fn list_fetcher(
        &self,
        params: &ListParams,
    ) -> impl Fn() -> futures::future::BoxFuture<'static, Result<Paginated<R>, SyncError>> + Send + Sync + 'static
    {
        let service = self.service.clone();
        let params = params.clone();
        move || {
            let service = service.clone();
            let params = params.clone();
            Box::pin(async move { service.list(&params).await })
        }
    }

    fn detail_fetcher(
        &self,
        id: &str,
    ) -> impl Fn() -> futures::future::BoxFuture<'static, Result<R, SyncError>> + Send + Sync + 'static {
        let service = self.service.clone();
        let id = id.to_string();
        move || {
            let service = service.clone();
            let id = id.clone();
            Box::pin(async move { service.get(&id).await })
        }
    }
}

impl ResourceQueries<Contract> {
    /// [`ResourceService::sign`] with the usual list invalidation and detail
    /// patch. An invalid signature fails before any request is made.
    pub fn sign_mutation(&self) -> Mutation<SignContract, Contract> {
        let service = self.service.clone();
        Mutation::new("contracts.sign", &self.cache, move |input: SignContract| {
            let service = service.clone();
            async move { service.sign(&input.id, &input.signature).await }
        })
        .invalidates(Self::lists())
        .patches(|_, signed: &Contract| Some((Self::detail_key(&signed.id), signed.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{HttpClient, InMemoryTransport, MemoryTokenStore, Method};
    use serde::Deserialize;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        id: String,
        body: String,
    }

    impl Resource for Note {
        const NAME: &'static str = "notes";
        fn id(&self) -> &str {
            &self.id
        }
    }

    fn queries(transport: Arc<InMemoryTransport>) -> ResourceQueries<Note> {
        let http = HttpClient::new(transport, Arc::new(MemoryTokenStore::new()), Duration::from_secs(5));
        ResourceQueries::new(ResourceService::new(http), QueryCache::default())
    }

    #[test]
    fn test_key_layout() {
        let params = ListParams::default().page(2).filter("status", "draft");
        assert_eq!(
            ResourceQueries::<Note>::list_key(&params).to_string(),
            r#"notes/list/{"page":"2","status":"draft"}"#
        );
        assert_eq!(ResourceQueries::<Note>::detail_key("n1").to_string(), r#"notes/detail/"n1""#);
        assert!(ResourceQueries::<Note>::lists().matches(&ResourceQueries::<Note>::list_key(&params)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_list_and_detail_through_cache() {
        let transport = Arc::new(InMemoryTransport::new());
        transport.respond_data(Method::Get, "/notes", json!([{"_id": "n1", "body": "hi"}]));
        transport.respond_data(Method::Get, "/notes/n1", json!({"_id": "n1", "body": "hi"}));
        let notes = queries(transport.clone());
        let options = notes.cache().default_options().stale_time(Duration::from_secs(30));

        let page = notes.list(&ListParams::default(), &options).await;
        let again = notes.list(&ListParams::default(), &options).await;
        let detail = notes.detail("n1", &options).await;

        assert_eq!(page.data().unwrap().items[0].id, "n1");
        assert_eq!(again.data(), page.data());
        assert_eq!(detail.data().unwrap().body, "hi");
        assert_eq!(transport.calls(Method::Get, "/notes"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_invalidates_list_and_patches_detail() {
        let transport = Arc::new(InMemoryTransport::new());
        transport.respond_data(Method::Get, "/notes", json!([{"id": "n1", "body": "hi"}]));
        transport.respond_data(Method::Put, "/notes/n1", json!({"id": "n1", "body": "edited"}));
        let notes = queries(transport.clone());
        let options = notes.cache().default_options().stale_time(Duration::from_secs(30));
        notes.list(&ListParams::default(), &options).await;

        notes
            .update_mutation()
            .mutate_async(Update { id: "n1".into(), patch: json!({"body": "edited"}) })
            .await
            .unwrap();

        let cache = notes.cache();
        assert!(!cache.is_fresh(&ResourceQueries::<Note>::list_key(&ListParams::default()), options.stale_time));
        let detail = notes.detail("n1", &options).await;
        assert_eq!(detail.data().unwrap().body, "edited");
        assert_eq!(transport.calls(Method::Get, "/notes/n1"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_drops_detail() {
        let transport = Arc::new(InMemoryTransport::new());
        transport.respond_json(Method::Delete, "/notes/n1", 200, json!({"success": true}));
        let notes = queries(transport);
        notes.cache().set_query_data(&ResourceQueries::<Note>::detail_key("n1"), Note { id: "n1".into(), body: "x".into() });

        notes.remove_mutation().mutate_async("n1".into()).await.unwrap();

        assert!(!notes.cache().contains(&ResourceQueries::<Note>::detail_key("n1")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_action_keeps_cache() {
        let transport = Arc::new(InMemoryTransport::new());
        transport.respond_json(
            Method::Post,
            "/notes/n1/archive",
            409,
            json!({"success": false, "message": "Already archived"}),
        );
        let notes = queries(transport);
        let original = Note { id: "n1".into(), body: "x".into() };
        notes.cache().set_query_data(&ResourceQueries::<Note>::detail_key("n1"), original.clone());

        let err = notes.action_mutation("archive").mutate_async(ActionInput::new("n1")).await.unwrap_err();

        assert_eq!(err.to_string(), "Already archived");
        let cached = notes.cache().get_query_data::<Note>(&ResourceQueries::<Note>::detail_key("n1"));
        assert_eq!(cached.as_deref(), Some(&original));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sign_mutation_validates_then_patches_detail() {
        use crate::resources::contracts::ContractStatus;

        let transport = Arc::new(InMemoryTransport::new());
        transport.respond_data(
            Method::Post,
            "/contracts/c1/sign",
            json!({"id": "c1", "title": "Lease", "status": "signed", "createdAt": "2025-01-01"}),
        );
        let http = HttpClient::new(transport.clone(), Arc::new(MemoryTokenStore::new()), Duration::from_secs(5));
        let contracts = ResourceQueries::<Contract>::new(ResourceService::new(http), QueryCache::default());
        let sign = contracts.sign_mutation();

        let unsigned = SignContract {
            id: "c1".into(),
            signature: SignatureInput { signer_name: " ".into(), signer_email: None, image: "AAAA".into() },
        };
        let err = sign.mutate_async(unsigned).await.unwrap_err();
        assert!(matches!(err, SyncError::Rejected { status: 400, .. }));
        assert_eq!(transport.total_calls(), 0);

        let signed = SignContract {
            id: "c1".into(),
            signature: SignatureInput {
                signer_name: "Ada".into(),
                signer_email: None,
                image: "data:image/png;base64,AA".into(),
            },
        };
        sign.mutate_async(signed).await.unwrap();

        let cached = contracts.cache().get_query_data::<Contract>(&ResourceQueries::<Contract>::detail_key("c1"));
        assert_eq!(cached.map(|c| c.status), Some(ContractStatus::Signed));
    }
}
