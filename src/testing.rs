//! A scripted search service for unit tests.

use std::{collections::VecDeque, sync::Mutex};

use async_trait::async_trait;
use serde_json::Value;

use crate::{
    error::{Error, Result},
    service::{Refresh, SearchService, WireResponse},
};

#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub endpoint: &'static str,
    pub index: Option<String>,
    pub id: Option<String>,
    pub body: Option<Value>,
    pub flag: Option<String>,
}

/// Answers each call with the next scripted response, in order.
pub struct ScriptedService {
    responses: Mutex<VecDeque<Result<WireResponse>>>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedService {
    pub fn new(responses: Vec<Result<WireResponse>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn answer(&self, call: Call) -> Result<WireResponse> {
        self.calls.lock().unwrap().push(call);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(Error::Connection("script exhausted".into())))
    }
}

#[async_trait]
impl SearchService for ScriptedService {
    async fn info(&self) -> Result<WireResponse> {
        self.answer(Call {
            endpoint: "info",
            index: None,
            id: None,
            body: None,
            flag: None,
        })
    }

    async fn create_index(
        &self,
        index: &str,
        body: &Value,
    ) -> Result<WireResponse> {
        self.answer(Call {
            endpoint: "create_index",
            index: Some(index.to_string()),
            id: None,
            body: Some(body.clone()),
            flag: None,
        })
    }

    async fn index_document(
        &self,
        index: &str,
        id: &str,
        body: &Value,
        refresh: Refresh,
    ) -> Result<WireResponse> {
        self.answer(Call {
            endpoint: "index_document",
            index: Some(index.to_string()),
            id: Some(id.to_string()),
            body: Some(body.clone()),
            flag: Some(refresh.as_param().to_string()),
        })
    }

    async fn delete_document(
        &self,
        index: &str,
        id: &str,
        refresh: Refresh,
    ) -> Result<WireResponse> {
        self.answer(Call {
            endpoint: "delete_document",
            index: Some(index.to_string()),
            id: Some(id.to_string()),
            body: None,
            flag: Some(refresh.as_param().to_string()),
        })
    }

    async fn search(
        &self,
        index: &str,
        body: &Value,
        track_total_hits: bool,
    ) -> Result<WireResponse> {
        self.answer(Call {
            endpoint: "search",
            index: Some(index.to_string()),
            id: None,
            body: Some(body.clone()),
            flag: Some(track_total_hits.to_string()),
        })
    }
}
