//! Deterministic compiler server address derived from the workspace path.

use std::path::Path;

const PORT_BASE: u16 = 20000;
const PORT_RANGE: u32 = 9000;

/// DJB2-style string hash (`h = h * 33 ^ byte`, seeded with 5381).
///
/// Stable across processes and platforms, unlike `std`'s randomized hasher.
pub fn stable_hash(s: &str) -> u32 {
    s.bytes()
        .fold(5381u32, |h, b| h.wrapping_mul(33) ^ u32::from(b))
}

/// Port the compiler server of the workspace at `path` listens on.
pub fn compiler_port(path: &Path) -> u16 {
    let offset = stable_hash(&path.to_string_lossy()) % PORT_RANGE;
    // offset < 9000, so the sum stays below u16::MAX.
    PORT_BASE + offset as u16
}

/// URL of the compiler server for the workspace at `path`.
pub fn compiler_url(path: &Path) -> String {
    format!("http://localhost:{}", compiler_port(path))
}

/// Extracts the port from a compiler URL of the form `http://host:port`.
pub fn port_from_url(url: &str) -> Option<u16> {
    let rest = url.split_once("://").map(|(_, r)| r).unwrap_or(url);
    let authority = rest.split('/').next()?;
    authority.rsplit_once(':')?.1.parse().ok()
}
