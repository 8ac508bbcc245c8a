//! Applying client operations to the backend.

use crate::backend::{BackendError, BackendResult, ModifyOptions, RemoveOutcome, SyncBackend};
use crate::context::RequestContext;
use crate::registry::Collection;
use airsync_protocol::{AddReply, Command, SyncStatus};
use tracing::{debug, warn};

/// Applies the commands of one collection in request order.
///
/// Item failures, transient ones included, are recorded on the collection
/// and never escalate, so writes that already succeeded are always
/// reported. A vanished folder or a failure of the batched removal fails
/// the collection. Only a lost session is returned as an error.
pub fn import_collection<B: SyncBackend>(
    ctx: &RequestContext,
    backend: &B,
    collection: &mut Collection,
) -> BackendResult<()> {
    if !collection.is_ok() || collection.commands.is_empty() {
        return Ok(());
    }
    let commands = std::mem::take(&mut collection.commands);
    let mut removals = Vec::new();

    for command in commands {
        let result = match command {
            Command::Add {
                client_id,
                class,
                mut data,
            } => {
                collection.imported_changes = true;
                data.class = class.unwrap_or(collection.class);
                match backend.add_item(&collection.id, &data) {
                    Ok(created) => {
                        collection.state.mirror(created.server_id.clone(), created.stamp);
                        collection.state.hold(created.server_id.clone(), created.stamp);
                        collection.client_ids.push(AddReply {
                            client_id,
                            class,
                            server_id: Some(created.server_id),
                            status: SyncStatus::Success,
                        });
                        Ok(())
                    }
                    Err(e) if is_item_error(&e) => {
                        warn!(collection = %collection.id, %client_id, error = %e, "add rejected");
                        collection.client_ids.push(AddReply {
                            client_id,
                            class,
                            server_id: None,
                            status: e.item_status(),
                        });
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            }
            Command::Modify {
                server_id,
                instance_id,
                data,
            } => {
                collection.imported_changes = true;
                let options = ModifyOptions {
                    conflict: collection.options.conflict(),
                    supported: &collection.supported,
                    baseline: collection.state.baseline,
                    instance_id: instance_id.as_deref(),
                };
                match backend.modify_item(&collection.id, &server_id, &data, &options) {
                    Ok(outcome) => {
                        collection.state.mirror(server_id.clone(), outcome.stamp);
                        collection.state.hold(server_id.clone(), outcome.stamp);
                        if outcome.server_modified {
                            collection.modified_ids.push(server_id);
                        }
                        Ok(())
                    }
                    Err(e) if is_item_error(&e) => {
                        warn!(collection = %collection.id, %server_id, error = %e, "change rejected");
                        collection.import_failures.push((server_id, e.item_status()));
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            }
            Command::Remove {
                server_id,
                instance_id: Some(instance_id),
            } => {
                collection.imported_changes = true;
                match backend.delete_instance(&collection.id, &server_id, &instance_id) {
                    Ok(stamp) => {
                        collection.state.mirror(server_id.clone(), stamp);
                        collection.state.hold(server_id, stamp);
                        Ok(())
                    }
                    Err(BackendError::NotFound(_)) => {
                        collection.missing.push(server_id);
                        Ok(())
                    }
                    Err(e) if is_item_error(&e) => {
                        warn!(collection = %collection.id, %server_id, error = %e, "instance removal rejected");
                        collection.import_failures.push((server_id, e.item_status()));
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            }
            Command::Remove {
                server_id,
                instance_id: None,
            } => {
                collection.imported_changes = true;
                removals.push(server_id);
                Ok(())
            }
            Command::Fetch { server_id } => {
                collection.fetch_ids.push(server_id);
                Ok(())
            }
        };
        if let Err(e) = result {
            return fail_collection(collection, e);
        }
    }

    if !removals.is_empty() {
        match remove(backend, collection, &removals) {
            Ok(outcome) => {
                for removed in outcome.removed {
                    collection.state.release(&removed.server_id);
                    collection.state.mirror(removed.server_id, removed.stamp);
                }
                for missing in &outcome.missing {
                    collection.state.release(missing);
                }
                collection.missing.extend(outcome.missing);
            }
            Err(e) => return fail_collection(collection, e),
        }
    }

    debug!(
        device = %ctx.device_id,
        collection = %collection.id,
        adds = collection.client_ids.len(),
        failures = collection.import_failures.len(),
        missing = collection.missing.len(),
        fetches = collection.fetch_ids.len(),
        "imported client changes"
    );
    Ok(())
}

fn remove<B: SyncBackend>(
    backend: &B,
    collection: &Collection,
    server_ids: &[String],
) -> BackendResult<RemoveOutcome> {
    if collection.deletes_as_moves {
        if let Some(waste) = backend.waste_basket(collection.class) {
            if waste != collection.id {
                return backend.move_items(&collection.id, server_ids, &waste);
            }
        }
    }
    backend.delete_items(&collection.id, server_ids)
}

fn is_item_error(error: &BackendError) -> bool {
    matches!(
        error,
        BackendError::NotFound(_)
            | BackendError::Rejected(_)
            | BackendError::Conflict(_)
            | BackendError::Temporary(_)
    )
}

fn fail_collection(collection: &mut Collection, error: BackendError) -> BackendResult<()> {
    if error.is_session_error() {
        return Err(error);
    }
    warn!(collection = %collection.id, %error, "import aborted");
    collection.fail(error.collection_status());
    Ok(())
}
