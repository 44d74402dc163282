use actix_web::dev::Payload;
use actix_web::web::Data;
use actix_web::{FromRequest, HttpRequest};
use futures::future::LocalBoxFuture;

use crate::db::peers::{Module, PeerStore};
use crate::error::ApiError;

/// Authenticated agent caller: the `X-API-Key` header resolved to its
/// module row. Handlers still check the path id against `module.id`.
#[derive(Debug)]
pub struct ApiKeyModule(pub Module);

impl FromRequest for ApiKeyModule {
    type Error = ApiError;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let store = req.app_data::<Data<PeerStore>>().cloned();
        let api_key = req
            .headers()
            .get("X-API-Key")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        Box::pin(async move {
            let store = store.ok_or_else(|| ApiError::Internal("peer store missing".into()))?;
            let api_key = api_key.ok_or(ApiError::Unauthorized)?;

            let module = store
                .find_module_by_api_key(&api_key)
                .await
                .map_err(|e| ApiError::Internal(e.to_string()))?
                .ok_or(ApiError::Unauthorized)?;

            Ok(ApiKeyModule(module))
        })
    }
}
