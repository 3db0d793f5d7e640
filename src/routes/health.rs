//! Health check and build info endpoints.

use actix_web::{HttpResponse, web};
use serde::{Deserialize, Serialize};

/// Identity facts the endpoints report about this node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    pub peer_id: String,
    pub public_key: String,
    pub nickname: String,
    pub topic: String,
}

/// Health check response.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct HealthResponse {
    pub status: String,
    pub peer_id: String,
    pub public_key: String,
    pub nickname: String,
    pub topic: String,
}

/// Build information response.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BuildInfoResponse {
    pub service: String,
    pub version: String,
    pub git_sha: String,
    pub build_time: String,
}

/// GET /health
#[tracing::instrument(skip(node))]
pub async fn health(node: web::Data<NodeInfo>) -> HttpResponse {
    let response = HealthResponse {
        status: "ok".to_string(),
        peer_id: node.peer_id.clone(),
        public_key: node.public_key.clone(),
        nickname: node.nickname.clone(),
        topic: node.topic.clone(),
    };

    HttpResponse::Ok().json(response)
}

/// GET /build-info
///
/// Returns build metadata for deployment verification.
#[tracing::instrument]
pub async fn build_info() -> HttpResponse {
    let response = BuildInfoResponse {
        service: "party-node".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_sha: env!("GIT_SHA").to_string(),
        build_time: env!("BUILD_TIME").to_string(),
    };

    HttpResponse::Ok().json(response)
}

/// Configure health routes on the given scope.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health))
        .route("/build-info", web::get().to(build_info));
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{App, test};

    fn node_info() -> NodeInfo {
        NodeInfo {
            peer_id: "QmNnooDu7bfjPFoTZYxMNLWUQJyrVwtbZg5gBMjTezGAJN".to_string(),
            public_key: "ab".repeat(32),
            nickname: "swift-otter".to_string(),
            topic: "tss-party:fete".to_string(),
        }
    }

    #[actix_rt::test]
    async fn test_health() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(node_info()))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::get().uri("/health").to_request();
        let resp = test::call_service(&app, req).await;

        assert!(resp.status().is_success());

        let body: HealthResponse = test::read_body_json(resp).await;
        assert_eq!(body.status, "ok");
        assert_eq!(body.public_key, "ab".repeat(32));
        assert_eq!(body.nickname, "swift-otter");
        assert_eq!(body.topic, "tss-party:fete");
    }

    #[actix_rt::test]
    async fn test_build_info() {
        let app = test::init_service(App::new().configure(configure)).await;

        let req = test::TestRequest::get().uri("/build-info").to_request();
        let resp = test::call_service(&app, req).await;

        assert!(resp.status().is_success());

        let body: BuildInfoResponse = test::read_body_json(resp).await;
        assert_eq!(body.service, "party-node");
        assert_eq!(body.version, env!("CARGO_PKG_VERSION"));
        assert!(!body.git_sha.is_empty());
    }
}
