use axum::{
    extract::{FromRequest, Request},
    Json,
};
use serde::de::DeserializeOwned;
use service_core::error::AppError;
use validator::{Validate, ValidationErrors};

/// JSON body that must also pass its `Validate` rules. Both parse and rule
/// failures are `400`.
pub struct ValidatedJson<T>(pub T);

#[axum::async_trait]
impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Validate + 'static,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await.map_err(|e| {
            AppError::BadRequest(anyhow::anyhow!("Json parse error: {}", e.body_text()))
        })?;

        value
            .validate()
            .map_err(|e| AppError::BadRequest(anyhow::anyhow!(first_message(&e))))?;

        Ok(ValidatedJson(value))
    }
}

/// The first rule message, falling back to the full error text.
fn first_message(errors: &ValidationErrors) -> String {
    let mut fields: Vec<_> = errors.field_errors().into_iter().collect();
    fields.sort_by(|a, b| a.0.cmp(&b.0));
    fields
        .into_iter()
        .flat_map(|(_, errs)| errs.iter())
        .find_map(|err| err.message.as_ref().map(|m| m.to_string()))
        .unwrap_or_else(|| errors.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, Validate)]
    struct Payload {
        #[validate(length(min = 1, message = "ids are required"))]
        ids: Vec<String>,
    }

    async fn extract(body: &str) -> Result<ValidatedJson<Payload>, AppError> {
        let req = Request::builder()
            .method("POST")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        ValidatedJson::<Payload>::from_request(req, &()).await
    }

    #[tokio::test]
    async fn rule_failure_uses_rule_message() {
        match extract(r#"{"ids": []}"#).await {
            Err(AppError::BadRequest(e)) => assert_eq!(e.to_string(), "ids are required"),
            _ => panic!("expected bad request"),
        }
    }

    #[tokio::test]
    async fn malformed_json_is_bad_request() {
        assert!(matches!(extract("{not json").await, Err(AppError::BadRequest(_))));
    }

    #[tokio::test]
    async fn valid_body_passes() {
        let ValidatedJson(payload) = extract(r#"{"ids": ["T1"]}"#).await.ok().unwrap();
        assert_eq!(payload.ids, vec!["T1".to_string()]);
    }
}
