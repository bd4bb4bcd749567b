use crate::routes::v1;
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(info(
    title = "corral",
    description = "OpenAI-compatible gateway over on-demand llama-server processes",
    version = "0.1.0",
))]
pub struct ApiDoc;

pub fn get_docs() -> utoipa::openapi::OpenApi {
    let mut root = ApiDoc::openapi();
    root.merge(v1::api_docs());
    root
}
