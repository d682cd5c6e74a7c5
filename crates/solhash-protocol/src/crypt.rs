// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of SolHash.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

//! MD5-crypt (`$1$salt$hash`) as required by the device for privileged commands.

use md5::{Digest, Md5};

const MAGIC: &str = "$1$";
const MAX_SALT_CHARS: usize = 8;
const ROUNDS: usize = 1000;
const ITOA64: &[u8; 64] = b"./0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Hash `password` with `salt` using the BSD/glibc MD5-crypt scheme.
///
/// A leading `$1$` on the salt is ignored, the salt stops at the first `$` and is
/// truncated to 8 characters.
pub fn md5_crypt(password: &str, salt: &str) -> String {
    let salt = salt.strip_prefix(MAGIC).unwrap_or(salt);
    let salt: String = salt
        .split('$')
        .next()
        .unwrap_or_default()
        .chars()
        .take(MAX_SALT_CHARS)
        .collect();

    let pw = password.as_bytes();
    let salt_bytes = salt.as_bytes();

    let mut alternate = Md5::new();
    alternate.update(pw);
    alternate.update(salt_bytes);
    alternate.update(pw);
    let alternate = alternate.finalize();

    let mut ctx = Md5::new();
    ctx.update(pw);
    ctx.update(MAGIC.as_bytes());
    ctx.update(salt_bytes);

    let mut remaining = pw.len();
    while remaining > 0 {
        let n = remaining.min(alternate.len());
        ctx.update(&alternate.as_slice()[..n]);
        remaining -= n;
    }

    let mut bits = pw.len();
    while bits > 0 {
        if bits & 1 == 1 {
            ctx.update([0u8]);
        } else {
            ctx.update(&pw[..1]);
        }
        bits >>= 1;
    }

    let mut digest = ctx.finalize();

    for round in 0..ROUNDS {
        let mut round_ctx = Md5::new();
        if round & 1 == 1 {
            round_ctx.update(pw);
        } else {
            round_ctx.update(digest.as_slice());
        }
        if round % 3 != 0 {
            round_ctx.update(salt_bytes);
        }
        if round % 7 != 0 {
            round_ctx.update(pw);
        }
        if round & 1 == 1 {
            round_ctx.update(digest.as_slice());
        } else {
            round_ctx.update(pw);
        }
        digest = round_ctx.finalize();
    }

    let mut out = String::with_capacity(MAGIC.len() + salt.len() + 1 + 22);
    out.push_str(MAGIC);
    out.push_str(&salt);
    out.push('$');

    for (a, b, c) in [(0, 6, 12), (1, 7, 13), (2, 8, 14), (3, 9, 15), (4, 10, 5)] {
        let value =
            (u32::from(digest[a]) << 16) | (u32::from(digest[b]) << 8) | u32::from(digest[c]);
        push_base64(&mut out, value, 4);
    }
    push_base64(&mut out, u32::from(digest[11]), 2);

    out
}

fn push_base64(out: &mut String, mut value: u32, chars: usize) {
    for _ in 0..chars {
        out.push(char::from(ITOA64[(value & 0x3f) as usize]));
        value >>= 6;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_vector() {
        assert_eq!(
            md5_crypt("Hello world!", "saltstring"),
            "$1$saltstri$YMyguxXMBpd2TEZ.vS/3q1"
        );
        assert_eq!(
            md5_crypt("admin", "BQ5hoXV9"),
            "$1$BQ5hoXV9$RxmaDUO33TS7O26yeMHZ81"
        );
    }

    #[test]
    fn test_magic_prefix_on_salt_is_ignored() {
        assert_eq!(
            md5_crypt("Hello world!", "$1$saltstring$"),
            md5_crypt("Hello world!", "saltstring")
        );
    }

    #[test]
    fn test_output_shape() {
        let hash = md5_crypt("admin", "BQ5hoXV9");
        assert!(hash.starts_with("$1$BQ5hoXV9$"));
        assert_eq!(hash.len(), "$1$BQ5hoXV9$".len() + 22);
        assert!(!hash.contains("admin"));
    }

    #[test]
    fn test_salt_changes_hash() {
        assert_ne!(md5_crypt("admin", "aaaaaaaa"), md5_crypt("admin", "aaaaaaab"));
    }
}
