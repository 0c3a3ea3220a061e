//! Transformation of concurrent operations.
//!
//! Given two operations authored against the same document state,
//! [`transform`] rewrites the first so it can be applied after the second.
//! Applying both operations in either order then converges on the same
//! document (TP1):
//!
//! ```text
//! apply(apply(d, a), transform(b, a, Right)) == apply(apply(d, b), transform(a, b, Left))
//! ```

use crate::operation::{char_len, Operation, OtError, OtResult, Prim};

/// Tie-break for two inserts at the same cursor position.
///
/// With [`Side::Left`] the transformed operation's insert lands *after* the
/// other operation's insert; with [`Side::Right`], before. A server that
/// applies one operation first and transforms the late arrival passes
/// `Left` for the late arrival.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

/// Transform `a` against `b`, both authored against the same base document.
///
/// The result spans the document produced by applying `b`. Walks both
/// operations in lockstep, consuming the overlap of the current primitives
/// at each step; partially consumed primitives carry their remainder into
/// the next step.
///
/// Fails with [`OtError::BaseMismatch`] when the operations do not span the
/// same base length.
pub fn transform(a: &Operation, b: &Operation, side: Side) -> OtResult<Operation> {
    let mut rest_a = a.prims().iter().cloned();
    let mut rest_b = b.prims().iter().cloned();
    let mut cur_a = rest_a.next();
    let mut cur_b = rest_b.next();
    let mut out = Operation::new();

    loop {
        match (cur_a.take(), cur_b.take()) {
            (None, None) => break,

            // Both insert at the same cursor; the side decides who goes first.
            (Some(Prim::Insert { text: text_a }), Some(Prim::Insert { text: text_b })) => {
                match side {
                    Side::Left => {
                        out.add_retain(char_len(&text_b));
                        cur_a = Some(Prim::Insert { text: text_a });
                        cur_b = rest_b.next();
                    }
                    Side::Right => {
                        out.add_insert(text_a);
                        cur_a = rest_a.next();
                        cur_b = Some(Prim::Insert { text: text_b });
                    }
                }
            }

            // An insert never consumes base content, so it passes through
            // unconditionally against retains and deletes.
            (Some(Prim::Insert { text }), other) => {
                out.add_insert(text);
                cur_a = rest_a.next();
                cur_b = other;
            }

            // Text inserted by `b` must be stepped over.
            (other, Some(Prim::Insert { text })) => {
                out.add_retain(char_len(&text));
                cur_a = other;
                cur_b = rest_b.next();
            }

            // One operation has residual retain/delete mass the other never
            // covered: they were not authored against the same base.
            (Some(_), None) | (None, Some(_)) => return Err(OtError::BaseMismatch),

            (Some(Prim::Retain { count: ca }), Some(Prim::Retain { count: cb })) => {
                let n = ca.min(cb);
                out.add_retain(n);
                cur_a = if ca > n {
                    Some(Prim::Retain { count: ca - n })
                } else {
                    rest_a.next()
                };
                cur_b = if cb > n {
                    Some(Prim::Retain { count: cb - n })
                } else {
                    rest_b.next()
                };
            }

            // `b` already deleted this span; nothing left for `a` to retain.
            (Some(Prim::Retain { count: ca }), Some(Prim::Delete { count: cb })) => {
                let n = ca.min(cb);
                cur_a = if ca > n {
                    Some(Prim::Retain { count: ca - n })
                } else {
                    rest_a.next()
                };
                cur_b = if cb > n {
                    Some(Prim::Delete { count: cb - n })
                } else {
                    rest_b.next()
                };
            }

            (Some(Prim::Delete { count: ca }), Some(Prim::Retain { count: cb })) => {
                let n = ca.min(cb);
                out.add_delete(n);
                cur_a = if ca > n {
                    Some(Prim::Delete { count: ca - n })
                } else {
                    rest_a.next()
                };
                cur_b = if cb > n {
                    Some(Prim::Retain { count: cb - n })
                } else {
                    rest_b.next()
                };
            }

            // Both deleted the same span; it is already gone.
            (Some(Prim::Delete { count: ca }), Some(Prim::Delete { count: cb })) => {
                let n = ca.min(cb);
                cur_a = if ca > n {
                    Some(Prim::Delete { count: ca - n })
                } else {
                    rest_a.next()
                };
                cur_b = if cb > n {
                    Some(Prim::Delete { count: cb - n })
                } else {
                    rest_b.next()
                };
            }
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Assert TP1 for a pair of concurrent operations against `doc` and
    /// return the converged document.
    fn assert_converges(doc: &str, a: &Operation, b: &Operation) -> String {
        let via_a = transform(b, a, Side::Right)
            .unwrap()
            .apply(&a.apply(doc).unwrap())
            .unwrap();
        let via_b = transform(a, b, Side::Left)
            .unwrap()
            .apply(&b.apply(doc).unwrap())
            .unwrap();
        assert_eq!(via_a, via_b, "operations diverged on {doc:?}");
        via_a
    }

    #[test]
    fn test_transform_insert_before_insert() {
        let a = Operation::new().retain(5).insert(",");
        let b = Operation::new().retain(5).insert("!");
        assert_eq!(assert_converges("hello", &a, &b), "hello!,");
    }

    #[test]
    fn test_transform_inserts_at_distinct_positions() {
        let a = Operation::new().insert("<").retain(4);
        let b = Operation::new().retain(4).insert(">");
        assert_eq!(assert_converges("text", &a, &b), "<text>");
    }

    #[test]
    fn test_same_position_insert_tie_break() {
        // Server applies `a` first, then transforms the late `b` with Left:
        // b's insert lands after a's.
        let a = Operation::new().insert("x").retain(3);
        let b = Operation::new().insert("y").retain(3);

        let b_transformed = transform(&b, &a, Side::Left).unwrap();
        assert_eq!(
            b_transformed,
            Operation::new().retain(1).insert("y").retain(3)
        );

        let doc = a.apply("abc").unwrap();
        assert_eq!(doc, "xabc");
        assert_eq!(b_transformed.apply(&doc).unwrap(), "xyabc");

        assert_converges("abc", &a, &b);
    }

    #[test]
    fn test_overlapping_deletes() {
        // a deletes "hello", b deletes "ello w"; a is applied first.
        let a = Operation::new().delete(5).retain(6);
        let b = Operation::new().retain(1).delete(6).retain(4);

        let b_transformed = transform(&b, &a, Side::Left).unwrap();
        assert_eq!(b_transformed, Operation::new().delete(2).retain(4));

        let doc = a.apply("hello world").unwrap();
        assert_eq!(doc, " world");
        assert_eq!(b_transformed.apply(&doc).unwrap(), "orld");

        assert_eq!(assert_converges("hello world", &a, &b), "orld");
    }

    #[test]
    fn test_insert_versus_delete() {
        let a = Operation::new().retain(2).insert("XY").retain(3);
        let b = Operation::new().delete(4).retain(1);
        assert_eq!(assert_converges("abcde", &a, &b), "XYe");
    }

    #[test]
    fn test_delete_through_retained_insert() {
        // b inserts inside the span a deletes; the insert survives.
        let a = Operation::new().delete(5);
        let b = Operation::new().retain(2).insert("-").retain(3);

        let a_transformed = transform(&a, &b, Side::Left).unwrap();
        assert_eq!(
            a_transformed,
            Operation::new().delete(2).retain(1).delete(3)
        );
        assert_eq!(assert_converges("abcde", &a, &b), "-");
    }

    #[test]
    fn test_transform_identity() {
        let op = Operation::new().retain(2).insert("zz").delete(3);
        let id = Operation::identity(op.base_len());

        assert_eq!(transform(&op, &id, Side::Left).unwrap(), op);
        assert_eq!(transform(&op, &id, Side::Right).unwrap(), op);
        assert_eq!(transform(&id, &op, Side::Left).unwrap().base_len(), op.target_len());
    }

    #[test]
    fn test_transform_counts_code_points() {
        // b inserts multibyte text; the retain emitted for it must count
        // code points, not bytes.
        let a = Operation::new().retain(2).insert("!");
        let b = Operation::new().insert("héllo").retain(2);
        assert_eq!(assert_converges("ab", &a, &b), "hélloab!");
    }

    #[test]
    fn test_base_mismatch() {
        let a = Operation::new().retain(5);
        let b = Operation::new().retain(3);
        assert_eq!(transform(&a, &b, Side::Left), Err(OtError::BaseMismatch));

        let a = Operation::new().delete(2);
        let b = Operation::new().delete(2).delete(0).retain(1);
        assert_eq!(transform(&a, &b, Side::Right), Err(OtError::BaseMismatch));
    }

    #[test]
    fn test_convergence_matrix() {
        let doc = "the quick brown fox";
        let cases = [
            (
                Operation::new().retain(4).delete(6).retain(9),
                Operation::new().retain(10).insert("dark ").retain(9),
            ),
            (
                Operation::new().delete(19).insert("rewritten"),
                Operation::new().retain(19).insert("!"),
            ),
            (
                Operation::new().insert("A").retain(19),
                Operation::new().insert("B").retain(19),
            ),
            (
                Operation::new().retain(3).delete(1).insert("_").retain(15),
                Operation::new().retain(3).delete(1).insert("-").retain(15),
            ),
        ];

        for (a, b) in &cases {
            assert_converges(doc, a, b);
        }
    }
}
