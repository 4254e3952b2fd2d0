use std::cmp::Ordering;
use std::io::{self, Write};

use crate::records::RecordSlice;

/// Counters from one [`merge_records`] pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// Records written in total.
    pub written: usize,
    /// Records taken from the newer side.
    pub from_newer: usize,
    /// Records taken from the older side.
    pub from_older: usize,
    /// Older records dropped because the newer side had the same id.
    pub superseded: usize,
}

/// Stream the union of two sorted record sets into `out`, ascending by id.
///
/// When both sides hold the same id, the `newer` record is written and the
/// `older` one is dropped. Both inputs must be strictly sorted and share a
/// record width.
pub fn merge_records<W: Write>(
    out: &mut W,
    newer: RecordSlice<'_>,
    older: RecordSlice<'_>,
) -> io::Result<MergeStats> {
    debug_assert_eq!(newer.width(), older.width());

    let mut stats = MergeStats::default();
    let (mut i, mut j) = (0, 0);

    while i < newer.len() && j < older.len() {
        match newer.id_bytes(i).cmp(older.id_bytes(j)) {
            Ordering::Less => {
                out.write_all(newer.record(i))?;
                stats.from_newer += 1;
                i += 1;
            }
            Ordering::Greater => {
                out.write_all(older.record(j))?;
                stats.from_older += 1;
                j += 1;
            }
            Ordering::Equal => {
                out.write_all(newer.record(i))?;
                stats.from_newer += 1;
                stats.superseded += 1;
                i += 1;
                j += 1;
            }
        }
    }
    for rest in i..newer.len() {
        out.write_all(newer.record(rest))?;
        stats.from_newer += 1;
    }
    for rest in j..older.len() {
        out.write_all(older.record(rest))?;
        stats.from_older += 1;
    }

    stats.written = stats.from_newer + stats.from_older;
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::RecordBuffer;
    use objmeta_types::ObjectId;

    fn id(byte: u8) -> ObjectId {
        ObjectId::from_hash([byte; 20])
    }

    fn buffer(entries: &[(u8, u8)]) -> RecordBuffer {
        let mut buf = RecordBuffer::with_capacity(1, entries.len());
        for &(k, v) in entries {
            buf.push(&id(k), &[v]);
        }
        buf
    }

    fn merged(newer: &[(u8, u8)], older: &[(u8, u8)]) -> (Vec<(u8, u8)>, MergeStats) {
        let newer = buffer(newer);
        let older = buffer(older);
        let mut out = Vec::new();
        let stats = merge_records(&mut out, newer.as_slice(), older.as_slice()).unwrap();
        let slice = RecordSlice::new(&out, 1);
        assert!(slice.is_strictly_sorted());
        let pairs = slice
            .iter()
            .map(|(id, payload)| (id.as_bytes()[0], payload[0]))
            .collect();
        (pairs, stats)
    }

    #[test]
    fn newer_wins_on_tie() {
        let (pairs, stats) = merged(&[(2, 99), (3, 30)], &[(1, 10), (2, 20)]);
        assert_eq!(pairs, vec![(1, 10), (2, 99), (3, 30)]);
        assert_eq!(
            stats,
            MergeStats {
                written: 3,
                from_newer: 2,
                from_older: 1,
                superseded: 1,
            }
        );
    }

    #[test]
    fn one_side_empty() {
        let (pairs, stats) = merged(&[], &[(1, 1), (5, 5)]);
        assert_eq!(pairs, vec![(1, 1), (5, 5)]);
        assert_eq!(stats.from_older, 2);

        let (pairs, stats) = merged(&[(4, 4)], &[]);
        assert_eq!(pairs, vec![(4, 4)]);
        assert_eq!(stats.from_newer, 1);
    }

    #[test]
    fn interleaved_union() {
        let (pairs, stats) = merged(
            &[(1, 1), (4, 40), (6, 6), (9, 9)],
            &[(2, 2), (4, 4), (5, 5), (10, 10)],
        );
        assert_eq!(
            pairs,
            vec![(1, 1), (2, 2), (4, 40), (5, 5), (6, 6), (9, 9), (10, 10)]
        );
        assert_eq!(stats.written, 7);
        assert_eq!(stats.superseded, 1);
    }

    #[test]
    fn write_error_propagates() {
        struct Broken;
        impl Write for Broken {
            fn write(&mut self, _: &[u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::Other, "disk full"))
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }
        let newer = buffer(&[(1, 1)]);
        let err = merge_records(&mut Broken, newer.as_slice(), RecordSlice::empty(1)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Other);
    }
}
