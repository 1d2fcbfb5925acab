//! Shared HTTP plumbing for the service clients

use menupic_core::error::{ServiceError, ServiceResult};
use serde::de::DeserializeOwned;

/// Map a reqwest failure onto the collaborator error type
pub(crate) fn transport_error(err: reqwest::Error) -> ServiceError {
    if err.is_timeout() {
        ServiceError::Timeout
    } else {
        ServiceError::Transport(err.to_string())
    }
}

/// Status and body of a response, read without judging the status
pub(crate) async fn read_raw(response: reqwest::Response) -> ServiceResult<(u16, String)> {
    let status = response.status().as_u16();
    let body = response.text().await.map_err(transport_error)?;
    Ok((status, body))
}

/// Decode a successful JSON body, or surface status and body as an error
pub(crate) async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> ServiceResult<T> {
    let (status, body) = read_raw(response).await?;
    decode_json(status, &body)
}

pub(crate) fn decode_json<T: DeserializeOwned>(status: u16, body: &str) -> ServiceResult<T> {
    if !(200..300).contains(&status) {
        return Err(ServiceError::Http {
            status,
            body: body.to_string(),
        });
    }
    serde_json::from_str(body)
        .map_err(|e| ServiceError::InvalidResponse(format!("{e}: {body}")))
}
