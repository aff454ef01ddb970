// Copyright Flow Offload Engine Contributors
// SPDX-License-Identifier: Apache-2.0

//! The tunnel auxiliary diagnostic dump endpoint.
//!
//! - GET `/offload/dump-vtp/:port` - dumps the ingress list, inner list,
//!   and merged-UFID cross product tracked for a tunnel virtual port.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use offload_core::OdpPort;
use offload_merge::TnlAuxDump;
use serde::Serialize;

use crate::AppState;

/// All routes this module contributes.
pub(crate) fn routes() -> Router<AppState> {
    Router::new().route("/offload/dump-vtp/{port}", get(dump_vtp))
}

#[derive(Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DumpVtpResponse {
    ingress: Vec<IngressEntryResponse>,
    inner: Vec<InnerEntryResponse>,
    merged: Vec<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct IngressEntryResponse {
    ufid: String,
    netdev: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InnerEntryResponse {
    ufid: String,
    ref_count: u32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ErrorResponse {
    error: String,
}

impl From<TnlAuxDump> for DumpVtpResponse {
    fn from(dump: TnlAuxDump) -> Self {
        Self {
            ingress: dump
                .ingress
                .into_iter()
                .map(|entry| IngressEntryResponse {
                    ufid: entry.ufid.to_string(),
                    netdev: entry.netdev,
                })
                .collect(),
            inner: dump
                .inner
                .into_iter()
                .map(|entry| InnerEntryResponse {
                    ufid: entry.ufid.to_string(),
                    ref_count: entry.ref_count,
                })
                .collect(),
            merged: dump.merged.into_iter().map(|ufid| ufid.to_string()).collect(),
        }
    }
}

pub(crate) async fn dump_vtp(
    State(state): State<AppState>,
    Path(port): Path<u32>,
) -> Result<Json<DumpVtpResponse>, (StatusCode, Json<ErrorResponse>)> {
    let port = OdpPort(port);
    let backend = state.ctx.backend();

    let Some(netdev) = backend.port_netdev(state.dpif_class, port) else {
        return Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("netdev not found for {port}"),
            }),
        ));
    };

    if !backend.port_kind(&netdev).is_tunnel_vport() {
        return Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("netdev {netdev} is not a vport"),
            }),
        ));
    }

    let Some(tnlaux) = state.ctx.tnlaux_registry().get(port) else {
        return Ok(Json(DumpVtpResponse::default()));
    };

    Ok(Json(DumpVtpResponse::from(tnlaux.dump())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use offload_core::MegaUfid;
    use offload_merge::{IngressDumpEntry, InnerDumpEntry};

    #[test]
    fn dump_response_formats_ufids_as_hex() {
        let dump = TnlAuxDump {
            ingress: vec![IngressDumpEntry {
                ufid: MegaUfid(1),
                netdev: "p1".to_string(),
            }],
            inner: vec![InnerDumpEntry {
                ufid: MegaUfid(2),
                ref_count: 1,
            }],
            merged: vec![MegaUfid(1).merge(MegaUfid(2))],
        };
        let response = DumpVtpResponse::from(dump);
        assert_eq!(response.ingress.len(), 1);
        assert_eq!(response.ingress[0].netdev, "p1");
        assert_eq!(response.merged.len(), 1);
        assert_eq!(response.merged[0], MegaUfid(1).merge(MegaUfid(2)).to_string());
    }

    #[test]
    fn empty_dump_serializes_to_empty_lists() {
        let response = DumpVtpResponse::default();
        assert!(response.ingress.is_empty());
        assert!(response.inner.is_empty());
        assert!(response.merged.is_empty());
    }
}
