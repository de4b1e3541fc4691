use std::fs;
use std::path::Path;
use tracing::warn;
use uuid::Uuid;

const VISITOR_ID_FILE: &str = "visitor_id";

/// Load the anonymous visitor id used by the non-authenticated assistant
/// mode, generating and persisting a fresh one when none exists or the
/// stored file is unreadable. Persistence failure is non-fatal: the id
/// simply will not survive the session.
pub fn load_or_create_visitor_id(data_dir: &Path) -> String {
    let path = data_dir.join(VISITOR_ID_FILE);

    if let Ok(contents) = fs::read_to_string(&path) {
        let id = contents.trim();
        if !id.is_empty() {
            return id.to_string();
        }
    }

    let id = format!("visitor-{}", Uuid::new_v4());
    if let Err(error) = fs::create_dir_all(data_dir) {
        warn!(%error, "could not create data dir, visitor id will not persist");
        return id;
    }
    if let Err(error) = fs::write(&path, &id) {
        warn!(%error, "could not persist visitor id");
    }
    id
}
