//! Data run (mapping pairs) codec.
//!
//! A non-resident attribute maps its virtual clusters onto volume clusters
//! through a sequence of runs. Each run is encoded as a header byte whose low
//! nibble is the byte count of the unsigned run length and whose high nibble
//! is the byte count of the signed LCN delta relative to the previous
//! non-sparse run. A zero high nibble marks a sparse hole. A `0x00` header
//! terminates the sequence.

use fntfs_error::{NtfsError, Result};
use fntfs_types::SPARSE_LCN;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// One extent: `length` clusters starting at `lcn`, or a hole when `lcn` is
/// `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DataRun {
    pub length: u64,
    pub lcn: Option<u64>,
}

impl DataRun {
    #[must_use]
    pub const fn new(length: u64, lcn: u64) -> Self {
        Self {
            length,
            lcn: Some(lcn),
        }
    }

    #[must_use]
    pub const fn sparse(length: u64) -> Self {
        Self { length, lcn: None }
    }

    #[must_use]
    pub const fn is_sparse(&self) -> bool {
        self.lcn.is_none()
    }
}

/// A contiguous piece of a VCN window resolved to volume clusters.
///
/// `lcn` is [`SPARSE_LCN`] for holes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LcnExtent {
    pub lcn: i64,
    pub clusters: u64,
}

/// Ordered run list of one attribute extent, starting at the extent's
/// lowest VCN.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataRunSequence {
    runs: Vec<DataRun>,
}

impl DataRunSequence {
    #[must_use]
    pub const fn new() -> Self {
        Self { runs: Vec::new() }
    }

    /// Build from runs, rejecting zero-length entries.
    pub fn from_runs(runs: Vec<DataRun>) -> Result<Self> {
        if let Some(index) = runs.iter().position(|run| run.length == 0) {
            return Err(NtfsError::InvalidArgument(format!(
                "data run {index} has zero length"
            )));
        }
        Ok(Self { runs })
    }

    #[must_use]
    pub fn runs(&self) -> &[DataRun] {
        &self.runs
    }

    #[must_use]
    pub fn into_runs(self) -> Vec<DataRun> {
        self.runs
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// Clusters covered, holes included.
    #[must_use]
    pub fn cluster_count(&self) -> u64 {
        self.runs.iter().map(|run| run.length).sum()
    }

    /// Append an extent, merging it into the last run when contiguous.
    pub fn push(&mut self, run: DataRun) {
        if run.length == 0 {
            return;
        }
        if let Some(last) = self.runs.last_mut() {
            let contiguous = match (last.lcn, run.lcn) {
                (None, None) => true,
                (Some(prev), Some(next)) => prev + last.length == next,
                _ => false,
            };
            if contiguous {
                last.length += run.length;
                return;
            }
        }
        self.runs.push(run);
    }

    /// Keep the first `clusters` clusters and return the extents cut off.
    pub fn truncate(&mut self, clusters: u64) -> Vec<DataRun> {
        let mut kept = 0_u64;
        let mut split_at = self.runs.len();
        let mut released = Vec::new();
        for (index, run) in self.runs.iter_mut().enumerate() {
            if kept + run.length <= clusters {
                kept += run.length;
                continue;
            }
            let keep_here = clusters - kept;
            if keep_here > 0 {
                released.push(DataRun {
                    length: run.length - keep_here,
                    lcn: run.lcn.map(|lcn| lcn + keep_here),
                });
                run.length = keep_here;
                split_at = index + 1;
            } else {
                split_at = index;
            }
            break;
        }
        released.extend(self.runs.drain(split_at..));
        released
    }

    /// Volume cluster backing `vcn` (relative to the sequence start), or
    /// `None` for a hole. Errors when `vcn` lies past the mapped range.
    pub fn lcn_for_vcn(&self, vcn: u64) -> Result<Option<u64>> {
        let mut start = 0_u64;
        for run in &self.runs {
            if vcn < start + run.length {
                return Ok(run.lcn.map(|lcn| lcn + (vcn - start)));
            }
            start += run.length;
        }
        Err(NtfsError::InvalidArgument(format!(
            "vcn {vcn} beyond mapped range of {start} clusters"
        )))
    }

    /// Resolve the VCN window `[start_vcn, start_vcn + count)` into volume
    /// extents. Holes come back as [`SPARSE_LCN`]; the part of the window
    /// past the mapped range is simply not reported.
    #[must_use]
    pub fn translate_to_lcn(&self, start_vcn: u64, count: u64) -> SmallVec<[LcnExtent; 4]> {
        let end_vcn = start_vcn.saturating_add(count);
        let mut out = SmallVec::new();
        let mut run_start = 0_u64;
        for run in &self.runs {
            let run_end = run_start + run.length;
            if run_end <= start_vcn {
                run_start = run_end;
                continue;
            }
            if run_start >= end_vcn {
                break;
            }
            let from = start_vcn.max(run_start);
            let to = end_vcn.min(run_end);
            let lcn = run
                .lcn
                .map_or(SPARSE_LCN, |lcn| (lcn + (from - run_start)) as i64);
            out.push(LcnExtent {
                lcn,
                clusters: to - from,
            });
            run_start = run_end;
        }
        out
    }

    /// Encoded size in bytes, terminator included.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        let mut previous = 0_i64;
        let mut len = 1;
        for run in &self.runs {
            len += 1 + unsigned_width(run.length);
            if let Some(lcn) = run.lcn {
                len += signed_width(lcn as i64 - previous);
                previous = lcn as i64;
            }
        }
        len
    }

    /// Encode with minimal field widths, appending the `0x00` terminator.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        let mut previous = 0_i64;
        for run in &self.runs {
            let length_width = unsigned_width(run.length);
            let (delta, delta_width) = match run.lcn {
                Some(lcn) => {
                    let delta = lcn as i64 - previous;
                    previous = lcn as i64;
                    (delta, signed_width(delta))
                }
                None => (0, 0),
            };
            out.push(((delta_width as u8) << 4) | length_width as u8);
            out.extend_from_slice(&run.length.to_le_bytes()[..length_width]);
            out.extend_from_slice(&delta.to_le_bytes()[..delta_width]);
        }
        out.push(0);
        out
    }

    /// Decode runs from `buf`, which spans exactly the attribute's mapping
    /// pairs area. Decoding stops at the terminator or at the end of `buf`.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut runs = Vec::new();
        let mut pos = 0_usize;
        let mut previous = 0_i64;
        while pos < buf.len() {
            let header = buf[pos];
            if header == 0 {
                break;
            }
            let length_width = usize::from(header & 0x0F);
            let delta_width = usize::from(header >> 4);
            if length_width == 0 || length_width > 8 || delta_width > 8 {
                return Err(NtfsError::corrupt(
                    "data run",
                    format!("invalid run header {header:#04x} at offset {pos}"),
                ));
            }
            let fields_end = pos + 1 + length_width + delta_width;
            if fields_end > buf.len() {
                return Err(NtfsError::corrupt(
                    "data run",
                    format!(
                        "run at offset {pos} needs {} bytes, {} available",
                        1 + length_width + delta_width,
                        buf.len() - pos
                    ),
                ));
            }
            let length = read_unsigned(&buf[pos + 1..pos + 1 + length_width]);
            if length == 0 || length > i64::MAX as u64 {
                return Err(NtfsError::corrupt(
                    "data run",
                    format!("run at offset {pos} has invalid length {length}"),
                ));
            }
            let lcn = if delta_width == 0 {
                None
            } else {
                let delta = read_signed(&buf[pos + 1 + length_width..fields_end]);
                let lcn = previous.checked_add(delta).filter(|lcn| *lcn >= 0).ok_or_else(|| {
                    NtfsError::corrupt(
                        "data run",
                        format!("run at offset {pos} resolves to a negative lcn"),
                    )
                })?;
                previous = lcn;
                Some(lcn as u64)
            };
            runs.push(DataRun { length, lcn });
            pos = fields_end;
        }
        Ok(Self { runs })
    }
}

impl From<DataRunSequence> for Vec<DataRun> {
    fn from(sequence: DataRunSequence) -> Self {
        sequence.runs
    }
}

/// Minimal byte count that holds `value` as an unsigned integer, at least one.
fn unsigned_width(value: u64) -> usize {
    let bits = u64::BITS - value.leading_zeros();
    bits.div_ceil(8).max(1) as usize
}

/// Minimal byte count that round-trips `value` as a signed integer.
fn signed_width(value: i64) -> usize {
    for width in 1..8 {
        let bits = width * 8;
        let min = -(1_i64 << (bits - 1));
        let max = (1_i64 << (bits - 1)) - 1;
        if (min..=max).contains(&value) {
            return width;
        }
    }
    8
}

fn read_unsigned(bytes: &[u8]) -> u64 {
    let mut raw = [0_u8; 8];
    raw[..bytes.len()].copy_from_slice(bytes);
    u64::from_le_bytes(raw)
}

fn read_signed(bytes: &[u8]) -> i64 {
    let negative = bytes.last().is_some_and(|byte| byte & 0x80 != 0);
    let mut raw = if negative { [0xFF_u8; 8] } else { [0_u8; 8] };
    raw[..bytes.len()].copy_from_slice(bytes);
    i64::from_le_bytes(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_decode_known_encoding() {
        // 0x18 clusters at 0x5634, then a 0x10-cluster hole, then 0x20
        // clusters 0x100 clusters *before* the first run.
        let bytes = [
            0x21, 0x18, 0x34, 0x56, 0x01, 0x10, 0x21, 0x20, 0x00, 0xFF, 0x00,
        ];
        let sequence = DataRunSequence::decode(&bytes).unwrap();
        assert_eq!(
            sequence.runs(),
            &[
                DataRun::new(0x18, 0x5634),
                DataRun::sparse(0x10),
                DataRun::new(0x20, 0x5534),
            ]
        );
        assert_eq!(sequence.encode(), bytes.to_vec());
        assert_eq!(sequence.encoded_len(), bytes.len());
    }

    #[test]
    fn test_minimal_widths() {
        assert_eq!(signed_width(0), 1);
        assert_eq!(signed_width(127), 1);
        assert_eq!(signed_width(128), 2);
        assert_eq!(signed_width(-128), 1);
        assert_eq!(signed_width(-129), 2);
        assert_eq!(signed_width(i64::MAX), 8);
        assert_eq!(unsigned_width(0), 1);
        assert_eq!(unsigned_width(0xFF), 1);
        assert_eq!(unsigned_width(0x100), 2);
        assert_eq!(unsigned_width(u64::MAX), 8);
        let sequence = DataRunSequence::from_runs(vec![DataRun::new(0x80, 0x80)]).unwrap();
        // The length is unsigned; only the lcn delta needs a sign byte.
        assert_eq!(sequence.encode(), vec![0x21, 0x80, 0x80, 0x00, 0x00]);
        assert_eq!(sequence.encoded_len(), 5);
        assert_eq!(DataRunSequence::decode(&sequence.encode()).unwrap(), sequence);

        let sequence = DataRunSequence::from_runs(vec![DataRun::new(0xFF, 0x10)]).unwrap();
        assert_eq!(sequence.encode(), vec![0x11, 0xFF, 0x10, 0x00], "case=full_length_byte");
    }

    #[test]
    fn test_decode_rejects_truncated_run() {
        let err = DataRunSequence::decode(&[0x33, 0x01, 0x02]).unwrap_err();
        assert!(err.is_corruption(), "case=fields_past_buffer err={err}");
        let err = DataRunSequence::decode(&[0x90, 0x01]).unwrap_err();
        assert!(err.is_corruption(), "case=oversized_nibble err={err}");
        let err = DataRunSequence::decode(&[0x11, 0x05, 0xF0, 0x00]).unwrap_err();
        assert!(err.is_corruption(), "case=negative_lcn err={err}");
        let err = DataRunSequence::decode(&[0x11, 0x00, 0x05, 0x00]).unwrap_err();
        assert!(err.is_corruption(), "case=zero_length err={err}");
    }

    #[test]
    fn test_decode_stops_at_buffer_end_without_terminator() {
        let sequence = DataRunSequence::decode(&[0x11, 0x04, 0x10]).unwrap();
        assert_eq!(sequence.runs(), &[DataRun::new(4, 0x10)]);
    }

    #[test]
    fn test_translate_window_with_hole() {
        let sequence = DataRunSequence::from_runs(vec![
            DataRun::new(4, 100),
            DataRun::sparse(3),
            DataRun::new(5, 200),
        ])
        .unwrap();
        let extents = sequence.translate_to_lcn(2, 8);
        assert_eq!(
            extents.as_slice(),
            &[
                LcnExtent { lcn: 102, clusters: 2 },
                LcnExtent {
                    lcn: SPARSE_LCN,
                    clusters: 3
                },
                LcnExtent { lcn: 200, clusters: 3 },
            ]
        );
        assert!(sequence.translate_to_lcn(12, 4).is_empty(), "case=past_end");
        assert_eq!(sequence.lcn_for_vcn(5).unwrap(), None);
        assert_eq!(sequence.lcn_for_vcn(8).unwrap(), Some(201));
        assert!(sequence.lcn_for_vcn(12).is_err());
    }

    #[test]
    fn test_push_merges_and_truncate_releases() {
        let mut sequence = DataRunSequence::new();
        sequence.push(DataRun::new(4, 10));
        sequence.push(DataRun::new(2, 14));
        sequence.push(DataRun::sparse(1));
        sequence.push(DataRun::sparse(1));
        sequence.push(DataRun::new(3, 50));
        assert_eq!(
            sequence.runs(),
            &[DataRun::new(6, 10), DataRun::sparse(2), DataRun::new(3, 50)]
        );
        let released = sequence.truncate(4);
        assert_eq!(sequence.runs(), &[DataRun::new(4, 10)]);
        assert_eq!(
            released,
            vec![DataRun::new(2, 14), DataRun::sparse(2), DataRun::new(3, 50)]
        );
        assert_eq!(sequence.cluster_count(), 4);
    }

    fn arb_runs() -> impl Strategy<Value = Vec<DataRun>> {
        prop::collection::vec(
            (1_u64..1 << 40, prop::option::weighted(0.8, 0_u64..1 << 47)),
            0..24,
        )
        .prop_map(|pairs| {
            pairs
                .into_iter()
                .map(|(length, lcn)| DataRun { length, lcn })
                .collect()
        })
    }

    proptest! {
        #[test]
        fn prop_decode_inverts_encode(runs in arb_runs()) {
            let sequence = DataRunSequence::from_runs(runs.clone()).unwrap();
            let bytes = sequence.encode();
            prop_assert_eq!(bytes.len(), sequence.encoded_len());
            let decoded = DataRunSequence::decode(&bytes).unwrap();
            prop_assert_eq!(decoded.runs(), runs.as_slice());
        }

        #[test]
        fn prop_translate_covers_window(runs in arb_runs(), start in 0_u64..1 << 41, count in 1_u64..1 << 20) {
            let sequence = DataRunSequence::from_runs(runs).unwrap();
            let total = sequence.cluster_count();
            let covered: u64 = sequence.translate_to_lcn(start, count).iter().map(|e| e.clusters).sum();
            let expected = total.saturating_sub(start).min(count);
            prop_assert_eq!(covered, expected);
        }
    }
}
