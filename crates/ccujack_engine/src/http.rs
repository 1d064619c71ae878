//! HTTP surface: static web UI, the VEAP protocol handler with basic
//! authentication and CORS, and the callback path reserved for the
//! controller's XML-RPC layer.

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use base64::Engine;
use ccujack_config::{Endpoint, PermKind, Store, User};
use ccujack_core::wire;
use ccujack_veap::{Service, VeapError};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::services::ServeDir;

const REALM: &str = "CCU-Jack VEAP-Server";

#[derive(Clone)]
pub struct AppState {
  pub service: Service,
  pub store: Arc<Store>,
}

/// Builds the HTTP router: `/ui` serves the static web UI, `/RPC3` is the
/// attachment point for the controller's XML-RPC callback codec, everything
/// else is handled by the VEAP protocol handler.
pub fn veap_router(state: AppState, web_ui_dir: &str, cors_origins: &[String]) -> Router {
  Router::new()
    .nest_service("/ui", ServeDir::new(web_ui_dir))
    .route("/RPC3", post(rpc_callback))
    .fallback(veap_handler)
    .layer(build_cors(cors_origins))
    .with_state(state)
}

// The XML-RPC codec for controller callbacks is an external collaborator;
// it replaces this handler when attached.
async fn rpc_callback() -> Response {
  StatusCode::NOT_IMPLEMENTED.into_response()
}

fn build_cors(origins: &[String]) -> CorsLayer {
  let cors = CorsLayer::new()
    .allow_methods([Method::GET, Method::PUT])
    .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);
  if origins.is_empty() {
    // wildcard origin, credentials are not allowed then (CORS spec)
    cors.allow_origin(Any)
  } else {
    let origins: Vec<HeaderValue> = origins
      .iter()
      .filter_map(|o| HeaderValue::from_str(o).ok())
      .collect();
    cors.allow_origin(AllowOrigin::list(origins)).allow_credentials(true)
  }
}

enum AuthOutcome {
  AllowAll,
  User(Box<User>),
  Unauthorized,
}

fn authenticate(store: &Store, headers: &HeaderMap) -> AuthOutcome {
  // if no active user is configured, allow everything for everyone
  if store.view(|cfg| !cfg.has_active_user()) {
    return AuthOutcome::AllowAll;
  }
  let Some((name, password)) = basic_credentials(headers) else {
    return AuthOutcome::Unauthorized;
  };
  match store.authenticate(Endpoint::Veap, &name, &password) {
    Some(user) => AuthOutcome::User(Box::new(user)),
    None => {
      warn!("Authentication request failed: user {name}");
      AuthOutcome::Unauthorized
    }
  }
}

fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
  let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
  let encoded = value.strip_prefix("Basic ")?;
  let decoded = base64::engine::general_purpose::STANDARD.decode(encoded).ok()?;
  let decoded = String::from_utf8(decoded).ok()?;
  let (name, password) = decoded.split_once(':')?;
  Some((name.to_owned(), password.to_owned()))
}

fn unauthorized() -> Response {
  (
    StatusCode::UNAUTHORIZED,
    [(
      header::WWW_AUTHENTICATE,
      format!("Basic realm=\"{REALM}\", charset=\"UTF-8\""),
    )],
    "Unauthorized",
  )
    .into_response()
}

fn veap_error(err: VeapError) -> Response {
  let status = StatusCode::from_u16(err.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
  (status, axum::Json(json!({"message": err.to_string()}))).into_response()
}

async fn veap_handler(
  State(state): State<AppState>,
  method: Method,
  uri: Uri,
  headers: HeaderMap,
  body: Bytes,
) -> Response {
  let user = match authenticate(&state.store, &headers) {
    AuthOutcome::AllowAll => None,
    AuthOutcome::User(user) => Some(user),
    AuthOutcome::Unauthorized => return unauthorized(),
  };

  let full_path = uri.path().trim_end_matches('/').to_owned();
  let (path, is_pv) = match full_path.strip_suffix("/~pv") {
    Some(path) => (path.to_owned(), true),
    None => (full_path, false),
  };

  // authorization is checked before the path is resolved
  let kind = if path == "/~vendor/config" {
    PermKind::Config
  } else if method == Method::PUT {
    PermKind::WritePv
  } else {
    PermKind::ReadPv
  };
  if let Some(user) = &user {
    if !user.authorized(Endpoint::Veap, kind, &path) {
      return (StatusCode::FORBIDDEN, "Forbidden").into_response();
    }
  }

  match (method, is_pv) {
    (Method::GET, true) => match state.service.read_pv(&path).await {
      Ok(pv) => match wire::pv_to_wire(&pv) {
        Ok(payload) => (
          StatusCode::OK,
          [(header::CONTENT_TYPE, "application/json")],
          payload,
        )
          .into_response(),
        Err(err) => veap_error(VeapError::Internal(err.to_string())),
      },
      Err(err) => veap_error(err),
    },
    (Method::PUT, true) => {
      let pv = wire::wire_to_pv(&body);
      match state.service.write_pv(&path, pv).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(err) => veap_error(err),
      }
    }
    (Method::GET, false) => match state.service.read_properties(&path).await {
      Ok((attrs, links)) => {
        let links: Vec<_> = links
          .iter()
          .map(|l| json!({"rel": l.role, "href": l.target}))
          .collect();
        let mut doc = attrs;
        doc.insert("~links".to_owned(), json!(links));
        (StatusCode::OK, axum::Json(serde_json::Value::Object(doc))).into_response()
      }
      Err(err) => veap_error(err),
    },
    _ => veap_error(VeapError::MethodNotAllowed(path)),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use axum::body::Body;
  use axum::http::Request;
  use ccujack_config::Permission;
  use ccujack_core::Pv;
  use ccujack_core::errors::ConfigError;
  use ccujack_veap::{Domain, DomainCfg, Variable, VariableCfg};
  use serde_json::Value;
  use std::sync::{RwLock, Weak};
  use tower::util::ServiceExt;

  fn service() -> Service {
    let root = Domain::new(
      DomainCfg {
        identifier: "root".to_owned(),
        title: "Root".to_owned(),
        description: String::new(),
        item_role: "domain".to_owned(),
        child_role: "domain".to_owned(),
      },
      Weak::<Domain>::new(),
    );
    let a = Domain::attached(
      DomainCfg {
        identifier: "a".to_owned(),
        title: "a".to_owned(),
        description: String::new(),
        item_role: "domain".to_owned(),
        child_role: "variable".to_owned(),
      },
      &root,
    );
    let stored = Arc::new(RwLock::new(Pv::new(json!(21.5))));
    let read_store = stored.clone();
    let write_store = stored;
    let var = Variable::new(
      VariableCfg {
        identifier: "x".to_owned(),
        title: "x".to_owned(),
        description: String::new(),
        read_pv: Box::new(move || Ok(read_store.read().unwrap().clone())),
        write_pv: Box::new(move |pv| {
          *write_store.write().unwrap() = pv;
          Ok(())
        }),
      },
      a.as_parent(),
    );
    a.children().put(var);
    Service::new(root)
  }

  fn router_with_user(active_user: bool) -> (tempfile::TempDir, Router) {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::new(dir.path().join("ccu-jack.cfg"));
    if active_user {
      store
        .update(|cfg| {
          let mut user = User {
            identifier: "u".to_owned(),
            active: true,
            ..User::default()
          };
          user.set_password("pw")?;
          user.add_permission(Permission {
            identifier: "p".to_owned(),
            endpoint: Endpoint::Veap.into(),
            kind: PermKind::ReadPv.into(),
            pv_filter: "/a/*".to_owned(),
            ..Permission::default()
          });
          cfg.users.insert("u".to_owned(), user);
          Ok::<_, ConfigError>(())
        })
        .unwrap();
    }
    let state = AppState {
      service: service(),
      store,
    };
    (dir, veap_router(state, "webui", &[]))
  }

  fn basic(user: &str, password: &str) -> String {
    format!(
      "Basic {}",
      base64::engine::general_purpose::STANDARD.encode(format!("{user}:{password}"))
    )
  }

  async fn body_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
  }

  #[tokio::test]
  async fn without_active_users_all_requests_pass() {
    let (_dir, router) = router_with_user(false);
    let response = router
      .oneshot(Request::get("/a/x/~pv").body(Body::empty()).unwrap())
      .await
      .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let doc = body_json(response).await;
    assert_eq!(doc["v"], json!(21.5));
    assert_eq!(doc["s"], json!(0));
  }

  #[tokio::test]
  async fn wrong_password_yields_401_with_challenge() {
    let (_dir, router) = router_with_user(true);
    let response = router
      .clone()
      .oneshot(
        Request::get("/a/x/~pv")
          .header(header::AUTHORIZATION, basic("u", "bad"))
          .body(Body::empty())
          .unwrap(),
      )
      .await
      .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let challenge = response.headers()[header::WWW_AUTHENTICATE].to_str().unwrap();
    assert!(challenge.contains("Basic realm=\"CCU-Jack VEAP-Server\""));
    assert!(challenge.contains("charset=\"UTF-8\""));
  }

  #[tokio::test]
  async fn authorized_read_passes_and_out_of_scope_read_is_forbidden() {
    let (_dir, router) = router_with_user(true);
    let response = router
      .clone()
      .oneshot(
        Request::get("/a/x/~pv")
          .header(header::AUTHORIZATION, basic("u", "pw"))
          .body(Body::empty())
          .unwrap(),
      )
      .await
      .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // outside of the PV filter: refused after authentication
    let response = router
      .clone()
      .oneshot(
        Request::get("/b/x/~pv")
          .header(header::AUTHORIZATION, basic("u", "pw"))
          .body(Body::empty())
          .unwrap(),
      )
      .await
      .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // write is not granted either
    let response = router
      .oneshot(
        Request::put("/a/x/~pv")
          .header(header::AUTHORIZATION, basic("u", "pw"))
          .body(Body::from(r#"{"v":1}"#))
          .unwrap(),
      )
      .await
      .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
  }

  #[tokio::test]
  async fn put_accepts_tolerant_payloads() {
    let (_dir, router) = router_with_user(false);
    let response = router
      .clone()
      .oneshot(Request::put("/a/x/~pv").body(Body::from("42")).unwrap())
      .await
      .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let response = router
      .oneshot(Request::get("/a/x/~pv").body(Body::empty()).unwrap())
      .await
      .unwrap();
    let doc = body_json(response).await;
    assert_eq!(doc["v"], json!(42));
  }

  #[tokio::test]
  async fn properties_include_links() {
    let (_dir, router) = router_with_user(false);
    let response = router
      .oneshot(Request::get("/a").body(Body::empty()).unwrap())
      .await
      .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let doc = body_json(response).await;
    assert_eq!(doc["identifier"], json!("a"));
    assert_eq!(doc["~links"][0]["href"], json!("x"));
  }

  #[tokio::test]
  async fn unknown_path_is_404() {
    let (_dir, router) = router_with_user(false);
    let response = router
      .oneshot(Request::get("/nope/~pv").body(Body::empty()).unwrap())
      .await
      .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
  }
}
