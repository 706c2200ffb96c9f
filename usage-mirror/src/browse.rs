//! Read-only HTTP view of the address space.
//!
//! `GET /nodes` returns the whole tree, `GET /nodes/<browse path>` the subtree
//! at that path (e.g. `/nodes/Devices/Panel/Channels/Channel%201`).

use std::net::SocketAddr;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};

use crate::{
    pipeline::MirrorError,
    publisher::{AddressSpace, NodePublisher, NodeView, PublishError},
};

pub fn router(space: AddressSpace) -> Router {
    Router::new()
        .route("/nodes", get(tree))
        .route("/nodes/*path", get(node_at))
        .with_state(space)
}

/// Spawn the browse server. Bind failures are logged, not returned.
pub fn serve(bind_addr: &str, space: AddressSpace) -> Result<(), MirrorError> {
    let addr: SocketAddr = bind_addr.parse().map_err(|e| {
        MirrorError::Publish(PublishError::Unavailable(format!(
            "invalid publisher.bind_addr {bind_addr}: {e}"
        )))
    })?;
    let app = router(space);

    tokio::spawn(async move {
        match tokio::net::TcpListener::bind(addr).await {
            Ok(listener) => {
                tracing::info!(%addr, "serving node tree");
                if let Err(e) = axum::serve(listener, app.into_make_service()).await {
                    tracing::error!(error = %e, "browse server error");
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to bind browse listener");
            }
        }
    });

    Ok(())
}

async fn tree(State(space): State<AddressSpace>) -> Result<Json<NodeView>, StatusCode> {
    space
        .view(space.root())
        .await
        .map(Json)
        .ok_or(StatusCode::INTERNAL_SERVER_ERROR)
}

async fn node_at(
    State(space): State<AddressSpace>,
    Path(path): Path<String>,
) -> Result<Json<NodeView>, StatusCode> {
    space.view_path(&path).await.map(Json).ok_or(StatusCode::NOT_FOUND)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vue_client::domain::DataValue;

    async fn space() -> AddressSpace {
        let space = AddressSpace::new();
        let devices = space.add_container(space.root(), "Devices").await.unwrap();
        let panel = space.add_container(devices, "Panel").await.unwrap();
        space.add_leaf(panel, "voltage", DataValue::Int(120)).await.unwrap();
        space
    }

    #[tokio::test]
    async fn tree_starts_at_root() {
        let Json(view) = tree(State(space().await)).await.unwrap();
        assert_eq!(view.name, "Objects");
        assert_eq!(view.children[0].name, "Devices");
    }

    #[tokio::test]
    async fn node_at_resolves_paths_and_404s_unknown_ones() {
        let space = space().await;

        let Json(view) = node_at(State(space.clone()), Path("Devices/Panel/voltage".to_string()))
            .await
            .unwrap();
        assert_eq!(view.value, Some(DataValue::Int(120)));

        let missing = node_at(State(space), Path("Devices/Nope".to_string())).await;
        assert_eq!(missing.unwrap_err(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn invalid_bind_addr_is_rejected() {
        assert!(serve("not an address", AddressSpace::new()).is_err());
    }
}
