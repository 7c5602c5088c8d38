use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::store::{self, SqliteRemote};
use serde_json::json;

fn handle_set_online(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(online) = req.params.get("online").and_then(|v| v.as_bool()) else {
        return err(&req.id, "bad_params", "missing online", None);
    };
    state.online = online;
    tracing::info!(online, "connectivity changed");
    ok(&req.id, json!({ "online": online }))
}

fn handle_status(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match store::pending_count(conn) {
        Ok(pending) => ok(
            &req.id,
            json!({ "online": state.online, "pendingCount": pending }),
        ),
        Err(e) => err(&req.id, e.code(), e.to_string(), e.details()),
    }
}

fn handle_reconcile(state: &mut AppState, req: &Request) -> serde_json::Value {
    if !state.online {
        return err(
            &req.id,
            "offline",
            "cannot reconcile while offline",
            None,
        );
    }
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let mut remote = SqliteRemote { conn };
    match store::reconcile(conn, &mut remote) {
        Ok(summary) => {
            tracing::info!(
                replayed = summary.replayed,
                skipped = summary.skipped,
                failed = summary.failed,
                "reconciliation finished"
            );
            ok(
                &req.id,
                json!({
                    "replayed": summary.replayed,
                    "skipped": summary.skipped,
                    "failed": summary.failed,
                }),
            )
        }
        Err(e) => err(&req.id, e.code(), e.to_string(), e.details()),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "sync.setOnline" => Some(handle_set_online(state, req)),
        "sync.status" => Some(handle_status(state, req)),
        "sync.reconcile" => Some(handle_reconcile(state, req)),
        _ => None,
    }
}
