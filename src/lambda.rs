//! Lambda invocation seam used by the replay engine

use async_trait::async_trait;
use aws_sdk_lambda::{
    error::{DisplayErrorContext, SdkError},
    primitives::Blob,
    types::InvocationType,
    Client,
};
use serde_json::Value;
use thiserror::Error;
use tracing::trace;

/// Failures that prevent an invocation from reaching the function
#[derive(Debug, Clone, Error)]
pub enum LambdaClientError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Service error: {0}")]
    Service(String),
}

/// Response of a synchronous invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationOutcome {
    pub status_code: i32,
    /// `X-Amz-Function-Error` header, set when the handler failed
    pub function_error: Option<String>,
    pub payload: Vec<u8>,
}

impl InvocationOutcome {
    pub fn success(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            status_code: 200,
            function_error: None,
            payload: payload.into(),
        }
    }

    pub fn function_error(kind: &str, message: &str) -> Self {
        Self {
            status_code: 200,
            function_error: Some(kind.to_string()),
            payload: serde_json::json!({ "errorMessage": message, "errorType": kind })
                .to_string()
                .into_bytes(),
        }
    }

    /// Why the function failed to handle the batch, if it did
    pub fn failure_reason(&self) -> Option<String> {
        let error_message = serde_json::from_slice::<Value>(&self.payload)
            .ok()
            .and_then(|value| {
                value
                    .get("errorMessage")
                    .map(|message| match message {
                        Value::String(text) => text.clone(),
                        other => other.to_string(),
                    })
            });

        if let Some(kind) = &self.function_error {
            return Some(match error_message {
                Some(message) => format!("{}: {}", kind, message),
                None => kind.clone(),
            });
        }
        if !(200..300).contains(&self.status_code) {
            return Some(format!("invocation returned status code {}", self.status_code));
        }
        error_message.map(|message| format!("function returned an error: {}", message))
    }
}

#[async_trait]
pub trait LambdaClientTrait: Send + Sync {
    /// Invoke `function_name` synchronously with a JSON payload
    async fn invoke(
        &self,
        function_name: &str,
        payload: Vec<u8>,
    ) -> Result<InvocationOutcome, LambdaClientError>;
}

#[async_trait]
impl LambdaClientTrait for Client {
    async fn invoke(
        &self,
        function_name: &str,
        payload: Vec<u8>,
    ) -> Result<InvocationOutcome, LambdaClientError> {
        let response = self
            .invoke()
            .function_name(function_name)
            .invocation_type(InvocationType::RequestResponse)
            .payload(Blob::new(payload))
            .send()
            .await
            .map_err(|err| {
                let message = DisplayErrorContext(&err).to_string();
                match err {
                    SdkError::DispatchFailure(_) => LambdaClientError::ConnectionError(message),
                    SdkError::TimeoutError(_) => LambdaClientError::Timeout(message),
                    _ => LambdaClientError::Service(message),
                }
            })?;

        let outcome = InvocationOutcome {
            status_code: response.status_code(),
            function_error: response.function_error().map(String::from),
            payload: response
                .payload()
                .map(|blob| blob.as_ref().to_vec())
                .unwrap_or_default(),
        };
        trace!(
            function = %function_name,
            status_code = outcome.status_code,
            "Invocation returned"
        );
        Ok(outcome)
    }
}
