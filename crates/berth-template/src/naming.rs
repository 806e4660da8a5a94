//! Name resolution within a namespace
//!
//! A colliding name gets `-` plus four random lowercase letters appended to
//! the caller's base name. The check is against a snapshot; the orchestrator
//! closes the remaining race with a reservation.

use rand::Rng;

/// Number of random letters in a suffix
pub const SUFFIX_LEN: usize = 4;

/// Pick a name not present in `existing`
pub fn resolve(desired: &str, existing: &[String]) -> String {
    resolve_with_rng(desired, existing, &mut rand::thread_rng())
}

/// [`resolve`] with an explicit random source
pub fn resolve_with_rng<R: Rng + ?Sized>(desired: &str, existing: &[String], rng: &mut R) -> String {
    let taken = |name: &str| existing.iter().any(|e| e == name);
    if !taken(desired) {
        return desired.to_string();
    }
    loop {
        let candidate = suffixed(desired, rng);
        if !taken(&candidate) {
            return candidate;
        }
    }
}

/// `base` plus a random suffix
pub fn suffixed<R: Rng + ?Sized>(base: &str, rng: &mut R) -> String {
    let suffix: String = (0..SUFFIX_LEN)
        .map(|_| char::from(b'a' + rng.gen_range(0..26u8)))
        .collect();
    format!("{base}-{suffix}")
}
