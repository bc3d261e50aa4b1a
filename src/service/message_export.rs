//! Message export start-time bookkeeping.

use crate::clock::now_millis;
use crate::config::ServerConfig;

/// Rewrite `export_from_timestamp` when `updated` toggles message export
/// relative to `current`.
///
/// Enabling with no start time starts exports from now; disabling clears the
/// start time so the next enable picks a fresh one. Applied to documents
/// submitted through the admin API only, never to files edited by hand.
pub fn handle_message_export_config(updated: &mut ServerConfig, current: &ServerConfig) {
    let export = &mut updated.message_export;
    if export.enable_export == current.message_export.enable_export {
        return;
    }

    if export.enable_export && export.export_from_timestamp == 0 {
        export.export_from_timestamp = now_millis();
    } else if !export.enable_export {
        export.export_from_timestamp = 0;
    }
}
