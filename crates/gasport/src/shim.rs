//! The bootstrap shim installed into every managed project.
//!
//! The dispatcher source and the two HTML pages are compile-time resources;
//! the strings themselves are the artifact, and this module only exposes
//! them together with their SHA-256 fingerprints and the manifest the
//! dispatcher needs (web-app + API-executable entry points on the V8
//! runtime).

use serde_json::json;
use sha2::{Digest, Sha256};

use crate::types::{FileType, MANIFEST_FILE, RemoteFile};

/// Name of the SERVER_JS dispatcher file.
pub const SHIM_FILE: &str = "__mcp_exec";

/// Name of the HTML page served for non-dispatch GETs.
pub const SUCCESS_PAGE_FILE: &str = "__mcp_exec_success";

/// Name of the HTML page linked from dispatch failures.
pub const ERROR_PAGE_FILE: &str = "__mcp_exec_error";

const SHIM_SOURCE: &str = include_str!("../templates/exec_shim.js");
const SUCCESS_PAGE_SOURCE: &str = include_str!("../templates/exec_success.html");
const ERROR_PAGE_SOURCE: &str = include_str!("../templates/exec_error.html");

/// Default time zone written into fresh manifests.
pub const DEFAULT_TIME_ZONE: &str = "Etc/UTC";

/// SHA-256 of a file's source, hex-encoded.
pub fn fingerprint(source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hex::encode(hasher.finalize())
}

/// The dispatcher file.
pub fn dispatcher() -> RemoteFile {
    RemoteFile::new(SHIM_FILE, FileType::ServerJs, SHIM_SOURCE)
}

/// The two HTML template files.
pub fn html_templates() -> [RemoteFile; 2] {
    [
        RemoteFile::new(SUCCESS_PAGE_FILE, FileType::Html, SUCCESS_PAGE_SOURCE),
        RemoteFile::new(ERROR_PAGE_FILE, FileType::Html, ERROR_PAGE_SOURCE),
    ]
}

/// Build the manifest for a managed project.
///
/// `webapp.access = MYSELF` and `executeAs = USER_DEPLOYING` mean the code
/// runs with the deploying user's full grants and is reachable only by them.
pub fn manifest(time_zone: &str) -> RemoteFile {
    let body = json!({
        "timeZone": time_zone,
        "dependencies": {},
        "exceptionLogging": "STACKDRIVER",
        "runtimeVersion": "V8",
        "webapp": {
            "access": "MYSELF",
            "executeAs": "USER_DEPLOYING",
        },
        "executionApi": {
            "access": "MYSELF",
        },
    });
    RemoteFile::new(
        MANIFEST_FILE,
        FileType::Json,
        serde_json::to_string_pretty(&body).expect("manifest is valid JSON"),
    )
}

/// All files the infrastructure layer owns, manifest first.
pub fn system_files(time_zone: &str) -> Vec<RemoteFile> {
    let [success, error] = html_templates();
    vec![manifest(time_zone), dispatcher(), success, error]
}

/// Whether a remote file name belongs to the shim (excluded from drift).
pub fn is_system_file(name: &str) -> bool {
    name == SHIM_FILE
        || name == SUCCESS_PAGE_FILE
        || name == ERROR_PAGE_FILE
        || name == MANIFEST_FILE
        || name.starts_with("common-js/")
}

/// Check that a manifest source carries both entry points the shim needs.
pub fn manifest_has_entry_points(source: &str) -> bool {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(source) else {
        return false;
    };
    value.get("webapp").is_some_and(|v| v.is_object())
        && value.get("executionApi").is_some_and(|v| v.is_object())
}
