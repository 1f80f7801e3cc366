//! Transport layer abstraction.

use crate::error::{CoreError, CoreResult};
use crate::upload::UploadControl;
use async_trait::async_trait;
use formsync_protocol::{Map, PostRequest, PostResponse, SearchRequest, SearchResponse, UploadRequest};
use parking_lot::Mutex;
use std::collections::VecDeque;

/// A transport carries requests to the remote authoritative store.
///
/// The wire encoding (REST, RPC, in-process) is up to the implementation.
/// Implementations map stale-version rejections to [`CoreError::Conflict`]
/// and missing records to [`CoreError::NotFound`].
#[async_trait]
pub trait Transport: Send + Sync {
    /// Runs a search over a model.
    async fn search(&self, model: &str, request: &SearchRequest) -> CoreResult<SearchResponse>;

    /// Sends a fetch, write, delete or action request.
    async fn post(&self, model: &str, request: &PostRequest) -> CoreResult<PostResponse>;

    /// Uploads a file attached to a record and returns the saved record.
    ///
    /// Progress is reported through [`UploadControl::report`].
    async fn upload(
        &self,
        model: &str,
        request: &UploadRequest,
        control: &UploadControl,
    ) -> CoreResult<Map>;
}

/// A call observed by [`MockTransport`].
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCall {
    /// Search call.
    Search(String, SearchRequest),
    /// Post call.
    Post(String, PostRequest),
    /// Upload call with the target field.
    Upload(String, String),
}

/// A scripted transport for testing.
///
/// Responses are queued per call kind and consumed in order. Every call is
/// recorded, including calls that find an empty queue.
#[derive(Debug, Default)]
pub struct MockTransport {
    search_responses: Mutex<VecDeque<CoreResult<SearchResponse>>>,
    post_responses: Mutex<VecDeque<CoreResult<PostResponse>>>,
    upload_responses: Mutex<VecDeque<CoreResult<Map>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl MockTransport {
    /// Creates a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a search response.
    pub fn push_search(&self, response: CoreResult<SearchResponse>) {
        self.search_responses.lock().push_back(response);
    }

    /// Queues a post response.
    pub fn push_post(&self, response: CoreResult<PostResponse>) {
        self.post_responses.lock().push_back(response);
    }

    /// Queues an upload response.
    pub fn push_upload(&self, response: CoreResult<Map>) {
        self.upload_responses.lock().push_back(response);
    }

    /// Returns all recorded calls.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    /// Returns the number of post calls of the given kind.
    pub fn post_count(&self, kind: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| matches!(call, RecordedCall::Post(_, request) if request.kind() == kind))
            .count()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn search(&self, model: &str, request: &SearchRequest) -> CoreResult<SearchResponse> {
        self.calls
            .lock()
            .push(RecordedCall::Search(model.to_string(), request.clone()));
        self.search_responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(CoreError::transport("no mock search response set")))
    }

    async fn post(&self, model: &str, request: &PostRequest) -> CoreResult<PostResponse> {
        self.calls
            .lock()
            .push(RecordedCall::Post(model.to_string(), request.clone()));
        self.post_responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(CoreError::transport("no mock post response set")))
    }

    async fn upload(
        &self,
        model: &str,
        request: &UploadRequest,
        control: &UploadControl,
    ) -> CoreResult<Map> {
        self.calls
            .lock()
            .push(RecordedCall::Upload(model.to_string(), request.field.clone()));
        let response = self
            .upload_responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(CoreError::transport("no mock upload response set")));
        if response.is_ok() {
            control.report(100);
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use formsync_protocol::ReadOptions;

    #[tokio::test]
    async fn mock_transport_without_script_fails() {
        let transport = MockTransport::new();
        let result = transport
            .search("Contact", &SearchRequest::default())
            .await;
        assert!(matches!(result, Err(CoreError::Transport { .. })));
        assert_eq!(transport.calls().len(), 1);
    }

    #[tokio::test]
    async fn mock_transport_consumes_in_order() {
        let transport = MockTransport::new();
        transport.push_post(Ok(PostResponse::default()));
        transport.push_post(Err(CoreError::not_found("Contact", 1)));

        let fetch = PostRequest::Fetch {
            id: 1,
            options: ReadOptions::default(),
        };
        assert!(transport.post("Contact", &fetch).await.is_ok());
        assert!(matches!(
            transport.post("Contact", &fetch).await,
            Err(CoreError::NotFound { .. })
        ));
        assert_eq!(transport.post_count("fetch"), 2);
        assert_eq!(transport.post_count("save"), 0);
    }
}
