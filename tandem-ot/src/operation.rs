//! Edit operations positioned by byte offset, and the pairwise transform
//! that reconciles two operations generated from the same base content.
//!
//! Positions are byte offsets into UTF-8 text. Offsets that would split a
//! multi-byte sequence are rejected by [`apply`], and [`diff`] only emits
//! operations whose boundaries fall on character boundaries — anything
//! else degrades to [`Operation::Retain`] and is resolved upstream.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from applying an operation to document content.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OtError {
    /// Insert offset outside the content, or inside a UTF-8 sequence.
    #[error("invalid insert position {position} (content length {len})")]
    InvalidPosition { position: usize, len: usize },
    /// Delete range outside the content, or misaligned with UTF-8.
    #[error("invalid delete range {start}..{end} (content length {len})")]
    InvalidRange { start: usize, end: usize, len: usize },
}

/// A single edit operation.
///
/// `client` is the stable identifier of the peer whose action produced the
/// operation; it doubles as the tiebreaker for same-position concurrent
/// inserts. `version` is the document version the peer believed current
/// when it generated the change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    Insert {
        position: usize,
        text: String,
        client: String,
        version: u64,
    },
    Delete {
        position: usize,
        length: usize,
        client: String,
        version: u64,
    },
    /// No-change placeholder returned by [`diff`].
    Retain,
}

impl Operation {
    /// Originating client, if any.
    pub fn client(&self) -> Option<&str> {
        match self {
            Operation::Insert { client, .. } | Operation::Delete { client, .. } => Some(client),
            Operation::Retain => None,
        }
    }

    pub fn is_retain(&self) -> bool {
        matches!(self, Operation::Retain)
    }

    /// Stamp the base version the client generated this operation against.
    pub fn with_version(mut self, v: u64) -> Self {
        match &mut self {
            Operation::Insert { version, .. } | Operation::Delete { version, .. } => *version = v,
            Operation::Retain => {}
        }
        self
    }
}

/// Apply `op` to `content`, producing the new content.
///
/// The input is never mutated; an error leaves the caller's state intact.
pub fn apply(content: &str, op: &Operation) -> Result<String, OtError> {
    match op {
        Operation::Insert { position, text, .. } => {
            let p = *position;
            if p > content.len() || !content.is_char_boundary(p) {
                return Err(OtError::InvalidPosition {
                    position: p,
                    len: content.len(),
                });
            }
            let mut out = String::with_capacity(content.len() + text.len());
            out.push_str(&content[..p]);
            out.push_str(text);
            out.push_str(&content[p..]);
            Ok(out)
        }
        Operation::Delete {
            position, length, ..
        } => {
            let p = *position;
            let end = p.checked_add(*length).unwrap_or(usize::MAX);
            if end > content.len() || !content.is_char_boundary(p) || !content.is_char_boundary(end)
            {
                return Err(OtError::InvalidRange {
                    start: p,
                    end,
                    len: content.len(),
                });
            }
            let mut out = String::with_capacity(content.len() - *length);
            out.push_str(&content[..p]);
            out.push_str(&content[end..]);
            Ok(out)
        }
        Operation::Retain => Ok(content.to_string()),
    }
}

/// Transform two operations generated from the same base content.
///
/// Returns `(a', b')` such that `apply(apply(s, a), b') == apply(apply(s, b), a')`
/// for all the positional cases; same-position concurrent inserts are
/// ordered by lexicographic comparison of the client identifiers, the
/// smaller one winning the earlier slot. Swapping the arguments yields the
/// mirror-image pair.
pub fn transform(a: &Operation, b: &Operation) -> (Operation, Operation) {
    use Operation::{Delete, Insert};
    match (a, b) {
        (Insert { .. }, Insert { .. }) => transform_insert_insert(a, b),
        (Insert { .. }, Delete { .. }) => transform_insert_delete(a, b),
        (Delete { .. }, Insert { .. }) => {
            let (i, d) = transform_insert_delete(b, a);
            (d, i)
        }
        (Delete { .. }, Delete { .. }) => transform_delete_delete(a, b),
        // Retain transforms to itself and leaves the other side untouched.
        _ => (a.clone(), b.clone()),
    }
}

fn transform_insert_insert(a: &Operation, b: &Operation) -> (Operation, Operation) {
    let (
        Operation::Insert {
            position: pa,
            text: ta,
            client: ca,
            ..
        },
        Operation::Insert {
            position: pb,
            text: tb,
            client: cb,
            ..
        },
    ) = (a, b)
    else {
        return (a.clone(), b.clone());
    };

    let mut ap = a.clone();
    let mut bp = b.clone();
    if pa < pb || (pa == pb && ca < cb) {
        // a occupies the earlier slot; b shifts right past it.
        shift_right(&mut bp, ta.len());
    } else {
        shift_right(&mut ap, tb.len());
    }
    (ap, bp)
}

fn transform_insert_delete(insert: &Operation, delete: &Operation) -> (Operation, Operation) {
    let (
        Operation::Insert {
            position: ip,
            text,
            ..
        },
        Operation::Delete {
            position: dp,
            length: dl,
            ..
        },
    ) = (insert, delete)
    else {
        return (insert.clone(), delete.clone());
    };

    let mut ins = insert.clone();
    let mut del = delete.clone();
    if ip <= dp {
        shift_right(&mut del, text.len());
    } else if *ip >= dp + dl {
        shift_left(&mut ins, *dl);
    } else {
        // Insert lands inside the deleted range: keep it, collapsed to the
        // start of the deletion. The delete's length is unchanged.
        set_position(&mut ins, *dp);
    }
    (ins, del)
}

fn transform_delete_delete(a: &Operation, b: &Operation) -> (Operation, Operation) {
    let (
        Operation::Delete {
            position: pa,
            length: la,
            ..
        },
        Operation::Delete {
            position: pb,
            length: lb,
            ..
        },
    ) = (a, b)
    else {
        return (a.clone(), b.clone());
    };

    let mut ap = a.clone();
    let mut bp = b.clone();
    let (end_a, end_b) = (pa + la, pb + lb);

    if end_a <= *pb {
        shift_left(&mut bp, *la);
    } else if end_b <= *pa {
        shift_left(&mut ap, *lb);
    } else {
        // Overlapping ranges: the region deleted by both counts once.
        let overlap = end_a.min(end_b) - pa.max(pb);
        shrink(&mut ap, overlap);
        shrink(&mut bp, overlap);
        if pa < pb {
            set_position(&mut bp, *pa);
        } else {
            set_position(&mut ap, *pb);
        }
    }
    (ap, bp)
}

fn shift_right(op: &mut Operation, n: usize) {
    if let Operation::Insert { position, .. } | Operation::Delete { position, .. } = op {
        *position += n;
    }
}

fn shift_left(op: &mut Operation, n: usize) {
    if let Operation::Insert { position, .. } | Operation::Delete { position, .. } = op {
        *position -= n;
    }
}

fn set_position(op: &mut Operation, p: usize) {
    if let Operation::Insert { position, .. } | Operation::Delete { position, .. } = op {
        *position = p;
    }
}

fn shrink(op: &mut Operation, n: usize) {
    if let Operation::Delete { length, .. } = op {
        *length -= n;
    }
}

/// Derive the single contiguous edit turning `old` into `new`.
///
/// Longer content yields an [`Operation::Insert`] at the first differing
/// byte, shorter a [`Operation::Delete`]. Equal-length changes, and edits
/// whose boundaries cannot be aligned to characters, yield
/// [`Operation::Retain`]; the caller treats that as a wholesale replace.
pub fn diff(old: &str, new: &str, client: &str) -> Operation {
    let (old_b, new_b) = (old.as_bytes(), new.as_bytes());

    if new_b.len() > old_b.len() {
        let inserted = new_b.len() - old_b.len();
        let pos = align_down(old, new, first_mismatch(old_b, new_b));
        let end = pos + inserted;
        if !new.is_char_boundary(end) {
            return Operation::Retain;
        }
        Operation::Insert {
            position: pos,
            text: new[pos..end].to_string(),
            client: client.to_string(),
            version: 0,
        }
    } else if old_b.len() > new_b.len() {
        let removed = old_b.len() - new_b.len();
        let pos = align_down(old, new, first_mismatch(old_b, new_b));
        if !old.is_char_boundary(pos + removed) {
            return Operation::Retain;
        }
        Operation::Delete {
            position: pos,
            length: removed,
            client: client.to_string(),
            version: 0,
        }
    } else {
        Operation::Retain
    }
}

fn first_mismatch(a: &[u8], b: &[u8]) -> usize {
    let n = a.len().min(b.len());
    (0..n).find(|&i| a[i] != b[i]).unwrap_or(n)
}

/// Walk an offset down to a position that is a character boundary in both
/// strings. The bytes before the first mismatch are identical, so the
/// boundaries coincide once both sides agree.
fn align_down(old: &str, new: &str, mut pos: usize) -> usize {
    while pos > 0 && !(old.is_char_boundary(pos) && new.is_char_boundary(pos)) {
        pos -= 1;
    }
    pos
}

#[cfg(test)]
mod tests {
    use super::*;

    fn insert(position: usize, text: &str, client: &str) -> Operation {
        Operation::Insert {
            position,
            text: text.to_string(),
            client: client.to_string(),
            version: 0,
        }
    }

    fn delete(position: usize, length: usize, client: &str) -> Operation {
        Operation::Delete {
            position,
            length,
            client: client.to_string(),
            version: 0,
        }
    }

    /// Both application orders must converge on the same content.
    fn assert_converges(base: &str, a: &Operation, b: &Operation) {
        let (ap, bp) = transform(a, b);
        let via_a = apply(&apply(base, a).unwrap(), &bp).unwrap();
        let via_b = apply(&apply(base, b).unwrap(), &ap).unwrap();
        assert_eq!(via_a, via_b, "divergence for {a:?} / {b:?} on {base:?}");
    }

    #[test]
    fn test_apply_insert_at_start_middle_end() {
        assert_eq!(apply("bc", &insert(0, "a", "x")).unwrap(), "abc");
        assert_eq!(apply("ac", &insert(1, "b", "x")).unwrap(), "abc");
        assert_eq!(apply("ab", &insert(2, "c", "x")).unwrap(), "abc");
    }

    #[test]
    fn test_apply_insert_out_of_range() {
        let err = apply("ab", &insert(3, "x", "x")).unwrap_err();
        assert_eq!(err, OtError::InvalidPosition { position: 3, len: 2 });
    }

    #[test]
    fn test_apply_insert_inside_multibyte_char() {
        // "é" spans bytes 1..3; offset 2 splits it.
        let err = apply("hé", &insert(2, "x", "x")).unwrap_err();
        assert!(matches!(err, OtError::InvalidPosition { position: 2, .. }));
    }

    #[test]
    fn test_apply_delete_full_content() {
        assert_eq!(apply("abc", &delete(0, 3, "x")).unwrap(), "");
    }

    #[test]
    fn test_apply_delete_out_of_range() {
        let err = apply("abc", &delete(1, 5, "x")).unwrap_err();
        assert_eq!(
            err,
            OtError::InvalidRange {
                start: 1,
                end: 6,
                len: 3
            }
        );
    }

    #[test]
    fn test_apply_delete_misaligned_utf8() {
        assert!(apply("héllo", &delete(1, 1, "x")).is_err());
        // Removing the whole character is fine.
        assert_eq!(apply("héllo", &delete(1, 2, "x")).unwrap(), "hllo");
    }

    #[test]
    fn test_apply_zero_length_delete_is_noop() {
        assert_eq!(apply("abc", &delete(1, 0, "x")).unwrap(), "abc");
    }

    #[test]
    fn test_apply_retain_is_identity() {
        assert_eq!(apply("abc", &Operation::Retain).unwrap(), "abc");
    }

    #[test]
    fn test_transform_insert_insert_disjoint() {
        let a = insert(0, "aa", "a1");
        let b = insert(3, "b", "b1");
        let (ap, bp) = transform(&a, &b);
        assert_eq!(ap, a);
        assert_eq!(bp, insert(5, "b", "b1"));
        assert_converges("xyz", &a, &b);
    }

    #[test]
    fn test_transform_insert_insert_same_position_tiebreak() {
        let a = insert(1, "A", "a1");
        let b = insert(1, "B", "b9");
        let (ap, bp) = transform(&a, &b);
        // "a1" < "b9": a keeps the slot, b shifts right.
        assert_eq!(ap, insert(1, "A", "a1"));
        assert_eq!(bp, insert(2, "B", "b9"));
        assert_converges("XY", &a, &b);
        assert_eq!(
            apply(&apply("XY", &a).unwrap(), &bp).unwrap(),
            "XABY",
            "smaller client id is linearised first"
        );
    }

    #[test]
    fn test_transform_tiebreak_is_mirror_symmetric() {
        let a = insert(1, "A", "a1");
        let b = insert(1, "B", "b9");
        let (ap, bp) = transform(&a, &b);
        let (bp2, ap2) = transform(&b, &a);
        assert_eq!(ap, ap2);
        assert_eq!(bp, bp2);
    }

    #[test]
    fn test_transform_insert_before_delete() {
        let i = insert(1, "xx", "a");
        let d = delete(2, 2, "b");
        let (ip, dp) = transform(&i, &d);
        assert_eq!(ip, i);
        assert_eq!(dp, delete(4, 2, "b"));
        assert_converges("abcd", &i, &d);
    }

    #[test]
    fn test_transform_insert_after_delete() {
        let i = insert(4, "x", "a");
        let d = delete(0, 2, "b");
        let (ip, dp) = transform(&i, &d);
        assert_eq!(ip, insert(2, "x", "a"));
        assert_eq!(dp, d);
        assert_converges("abcd", &i, &d);
    }

    #[test]
    fn test_transform_insert_inside_delete_clamps() {
        let i = insert(2, "X", "a");
        let d = delete(1, 2, "b");
        let (ip, dp) = transform(&i, &d);
        // Insert survives, collapsed to the start of the deleted range.
        assert_eq!(ip, insert(1, "X", "a"));
        assert_eq!(dp, d);
    }

    #[test]
    fn test_transform_delete_delete_disjoint() {
        let a = delete(0, 2, "a");
        let b = delete(4, 1, "b");
        let (ap, bp) = transform(&a, &b);
        assert_eq!(ap, a);
        assert_eq!(bp, delete(2, 1, "b"));
        assert_converges("abcde", &a, &b);
    }

    #[test]
    fn test_transform_delete_delete_overlapping() {
        let a = delete(1, 3, "a"); // bcd of abcde
        let b = delete(2, 3, "b"); // cde
        let (ap, bp) = transform(&a, &b);
        assert_eq!(ap, delete(1, 1, "a"));
        assert_eq!(bp, delete(1, 1, "b"));
        assert_converges("abcde", &a, &b);
        // Union of the two ranges is gone either way.
        let (_, bp) = transform(&a, &b);
        assert_eq!(apply(&apply("abcde", &a).unwrap(), &bp).unwrap(), "a");
    }

    #[test]
    fn test_transform_delete_delete_contained() {
        let outer = delete(1, 4, "a");
        let inner = delete(2, 2, "b");
        let (op, ip) = transform(&outer, &inner);
        assert_eq!(op, delete(1, 2, "a"));
        assert_eq!(ip, delete(1, 0, "b"));
        assert_converges("abcdef", &outer, &inner);
    }

    #[test]
    fn test_transform_delete_delete_identical() {
        let a = delete(1, 3, "a");
        let b = delete(1, 3, "b");
        assert_converges("abcde", &a, &b);
        let (ap, bp) = transform(&a, &b);
        assert_eq!(apply(&apply("abcde", &a).unwrap(), &bp).unwrap(), "ae");
        assert_eq!(apply(&apply("abcde", &b).unwrap(), &ap).unwrap(), "ae");
    }

    #[test]
    fn test_transform_retain_passthrough() {
        let a = insert(1, "x", "a");
        let (ap, bp) = transform(&a, &Operation::Retain);
        assert_eq!(ap, a);
        assert_eq!(bp, Operation::Retain);
    }

    #[test]
    fn test_diff_insert_at_start() {
        let op = diff("world", "hello world", "c");
        assert_eq!(op, insert(0, "hello ", "c"));
        assert_eq!(apply("world", &op).unwrap(), "hello world");
    }

    #[test]
    fn test_diff_insert_in_middle() {
        let op = diff("held", "hello world", "c");
        assert_eq!(apply("held", &op).unwrap(), "hello world");
    }

    #[test]
    fn test_diff_insert_at_end() {
        let op = diff("ab", "abcd", "c");
        assert_eq!(op, insert(2, "cd", "c"));
    }

    #[test]
    fn test_diff_into_empty() {
        assert_eq!(diff("", "hello", "c"), insert(0, "hello", "c"));
    }

    #[test]
    fn test_diff_delete_to_empty() {
        assert_eq!(diff("hello", "", "c"), delete(0, 5, "c"));
    }

    #[test]
    fn test_diff_delete_in_middle() {
        let op = diff("hello world", "held", "c");
        assert_eq!(apply("hello world", &op).unwrap(), "held");
    }

    #[test]
    fn test_diff_equal_is_retain() {
        assert!(diff("same", "same", "c").is_retain());
        assert!(diff("", "", "c").is_retain());
    }

    #[test]
    fn test_diff_equal_length_change_is_retain() {
        assert!(diff("abcd", "axyd", "c").is_retain());
    }

    #[test]
    fn test_diff_roundtrip_single_edits() {
        let cases = [
            ("", "a"),
            ("abc", "abxc"),
            ("abc", "ac"),
            ("héllo", "hllo"),
            ("日本語", "日本語です"),
            ("日本語", "語"),
        ];
        for (old, new) in cases {
            let op = diff(old, new, "c");
            assert_eq!(apply(old, &op).unwrap(), new, "diff({old:?}, {new:?})");
        }
    }

    #[test]
    fn test_diff_multibyte_boundary_alignment() {
        // First differing byte lands mid-character; the emitted operation
        // must still apply cleanly.
        let old = "aé";
        let new = "aèé";
        let op = diff(old, new, "c");
        if !op.is_retain() {
            assert_eq!(apply(old, &op).unwrap(), new);
        }
    }

    #[test]
    fn test_insert_then_inverse_delete() {
        let ins = insert(2, "XY", "c");
        let with = apply("abcd", &ins).unwrap();
        let del = delete(2, 2, "c");
        assert_eq!(apply(&with, &del).unwrap(), "abcd");
    }

    #[test]
    fn test_delete_then_inverse_insert() {
        let del = delete(1, 2, "c");
        let without = apply("abcd", &del).unwrap();
        let ins = insert(1, "bc", "c");
        assert_eq!(apply(&without, &ins).unwrap(), "abcd");
    }
}
