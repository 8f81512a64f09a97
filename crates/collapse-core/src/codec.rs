//! Binary wire format for shard results.
//!
//! Every buffer starts with a two byte header: the format version and the
//! kind of value that follows (ranked set, grouped set or full shard
//! envelope). Counts and integers are LEB128 varints, floats are little
//! endian, and every typed value carries a one byte tag. A count of zero is
//! a legal empty sequence; optional values carry an explicit presence byte
//! so "absent" and "empty" never collide.
//!
//! Decoding never substitutes defaults. A short buffer is
//! [`CodecErrorKind::Truncated`](crate::error::CodecErrorKind::Truncated), an
//! unexpected tag is `TypeMismatch`, a header from another format version is
//! `VersionMismatch`, and leftover bytes are `Malformed`.

use crate::error::{CodecError, CodecResult};
use crate::group::{GroupIdentity, GroupResult, GroupValue, GroupedResultSet};
use crate::sort::{SortField, SortFieldKind, SortSpec, SortValue};
use crate::types::{
    AuxiliaryPayloads, RankedHit, RankedResultSet, ResultPhase, ShardId, ShardPayload,
    ShardQueryResult,
};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Current wire format version.
pub const FORMAT_VERSION: u8 = 1;

const KIND_RANKED: u8 = 1;
const KIND_GROUPED: u8 = 2;
const KIND_ENVELOPE: u8 = 3;

const SV_NULL: u8 = 0;
const SV_INT: u8 = 1;
const SV_LONG: u8 = 2;
const SV_FLOAT: u8 = 3;
const SV_DOUBLE: u8 = 4;
const SV_TEXT: u8 = 5;
const SV_BYTES: u8 = 6;
const SV_BOOL: u8 = 7;

const GV_NULL: u8 = 0;
const GV_LONG: u8 = 1;
const GV_DOUBLE: u8 = 2;
const GV_TEXT: u8 = 3;
const GV_BYTES: u8 = 4;

const SF_SCORE: u8 = 0;
const SF_DOC: u8 = 1;
const SF_INT: u8 = 2;
const SF_LONG: u8 = 3;
const SF_FLOAT: u8 = 4;
const SF_DOUBLE: u8 = 5;
const SF_TEXT: u8 = 6;

const PHASE_PLAIN: u8 = 0;
const PHASE_GROUPS: u8 = 1;
const PHASE_HITS: u8 = 2;

// ============================================================================
// Public API
// ============================================================================

/// Encode whichever result set a payload holds.
pub fn encode(payload: &ShardPayload) -> CodecResult<Bytes> {
    match payload {
        ShardPayload::Ranked(set) => encode_ranked(set),
        ShardPayload::Grouped(set) => encode_grouped(set),
    }
}

/// Decode a ranked or grouped result set, whichever the header declares.
pub fn decode(buf: &[u8]) -> CodecResult<ShardPayload> {
    let mut reader = WireReader::new(buf);
    let payload = match reader.header()? {
        KIND_RANKED => ShardPayload::Ranked(reader.ranked_set()?),
        KIND_GROUPED => ShardPayload::Grouped(reader.grouped_set()?),
        other => {
            return Err(CodecError::type_mismatch(format!(
                "expected a result set, found kind {}",
                other
            )))
        }
    };
    reader.finish()?;
    Ok(payload)
}

pub fn encode_ranked(set: &RankedResultSet) -> CodecResult<Bytes> {
    let mut writer = WireWriter::new(KIND_RANKED);
    writer.ranked_set(set)?;
    Ok(writer.finish())
}

pub fn decode_ranked(buf: &[u8]) -> CodecResult<RankedResultSet> {
    let mut reader = WireReader::new(buf);
    reader.expect_kind(KIND_RANKED)?;
    let set = reader.ranked_set()?;
    reader.finish()?;
    Ok(set)
}

pub fn encode_grouped(set: &GroupedResultSet) -> CodecResult<Bytes> {
    let mut writer = WireWriter::new(KIND_GROUPED);
    writer.grouped_set(set)?;
    Ok(writer.finish())
}

pub fn decode_grouped(buf: &[u8]) -> CodecResult<GroupedResultSet> {
    let mut reader = WireReader::new(buf);
    reader.expect_kind(KIND_GROUPED)?;
    let set = reader.grouped_set()?;
    reader.finish()?;
    Ok(set)
}

/// Encode a complete shard envelope, payload and auxiliary data included.
pub fn encode_shard_result(result: &ShardQueryResult) -> CodecResult<Bytes> {
    let mut writer = WireWriter::new(KIND_ENVELOPE);
    writer.varint(result.shard_id.as_u32() as u64);
    writer.varint(result.context_id);
    writer.varint(result.from as u64);
    writer.varint(result.size as u64);
    writer.varint(result.group_from as u64);
    writer.varint(result.group_size as u64);
    writer.buf.put_u8(match result.phase {
        ResultPhase::Plain => PHASE_PLAIN,
        ResultPhase::Groups => PHASE_GROUPS,
        ResultPhase::Hits => PHASE_HITS,
    });
    match &result.payload {
        ShardPayload::Ranked(set) => {
            writer.buf.put_u8(KIND_RANKED);
            writer.ranked_set(set)?;
        }
        ShardPayload::Grouped(set) => {
            writer.buf.put_u8(KIND_GROUPED);
            writer.grouped_set(set)?;
        }
    }
    writer.opt_bytes(result.aux.facets.as_deref());
    writer.opt_bytes(result.aux.suggest.as_deref());
    writer.bool(result.timed_out);
    Ok(writer.finish())
}

pub fn decode_shard_result(buf: &[u8]) -> CodecResult<ShardQueryResult> {
    let mut r = WireReader::new(buf);
    r.expect_kind(KIND_ENVELOPE)?;
    let shard_id = ShardId::new(r.u32_varint("shard id")?);
    let context_id = r.varint()?;
    let from = r.u32_varint("from")?;
    let size = r.u32_varint("size")?;
    let group_from = r.u32_varint("group from")?;
    let group_size = r.u32_varint("group size")?;
    let phase = match r.u8()? {
        PHASE_PLAIN => ResultPhase::Plain,
        PHASE_GROUPS => ResultPhase::Groups,
        PHASE_HITS => ResultPhase::Hits,
        other => return Err(CodecError::type_mismatch(format!("unknown phase tag {}", other))),
    };
    let payload = match r.u8()? {
        KIND_RANKED => ShardPayload::Ranked(r.ranked_set()?),
        KIND_GROUPED => ShardPayload::Grouped(r.grouped_set()?),
        other => {
            return Err(CodecError::type_mismatch(format!(
                "unknown payload tag {}",
                other
            )))
        }
    };
    let facets = r.opt_bytes()?;
    let suggest = r.opt_bytes()?;
    let timed_out = r.bool()?;
    r.finish()?;
    Ok(ShardQueryResult {
        shard_id,
        context_id,
        from,
        size,
        group_from,
        group_size,
        phase,
        payload,
        aux: AuxiliaryPayloads { facets, suggest },
        timed_out,
    })
}

// ============================================================================
// Writer
// ============================================================================

struct WireWriter {
    buf: BytesMut,
}

impl WireWriter {
    fn new(kind: u8) -> Self {
        let mut buf = BytesMut::with_capacity(64);
        buf.put_u8(FORMAT_VERSION);
        buf.put_u8(kind);
        Self { buf }
    }

    fn finish(self) -> Bytes {
        self.buf.freeze()
    }

    fn varint(&mut self, mut value: u64) {
        while value >= 0x80 {
            self.buf.put_u8((value as u8 & 0x7f) | 0x80);
            value >>= 7;
        }
        self.buf.put_u8(value as u8);
    }

    fn bool(&mut self, value: bool) {
        self.buf.put_u8(value as u8);
    }

    fn len_prefixed(&mut self, data: &[u8]) {
        self.varint(data.len() as u64);
        self.buf.put_slice(data);
    }

    fn opt_bytes(&mut self, data: Option<&[u8]>) {
        match data {
            Some(data) => {
                self.bool(true);
                self.len_prefixed(data);
            }
            None => self.bool(false),
        }
    }

    fn sort_value(&mut self, value: &SortValue) -> CodecResult<()> {
        match value {
            SortValue::Null => self.buf.put_u8(SV_NULL),
            SortValue::Int(v) => {
                self.buf.put_u8(SV_INT);
                self.buf.put_i32_le(*v);
            }
            SortValue::Long(v) => {
                self.buf.put_u8(SV_LONG);
                self.buf.put_i64_le(*v);
            }
            SortValue::Float(v) => {
                self.buf.put_u8(SV_FLOAT);
                self.buf.put_f32_le(*v);
            }
            SortValue::Double(v) => {
                self.buf.put_u8(SV_DOUBLE);
                self.buf.put_f64_le(*v);
            }
            SortValue::Text(v) => {
                self.buf.put_u8(SV_TEXT);
                self.len_prefixed(v.as_bytes());
            }
            SortValue::Bytes(v) => {
                self.buf.put_u8(SV_BYTES);
                self.len_prefixed(v);
            }
            SortValue::Bool(v) => {
                self.buf.put_u8(SV_BOOL);
                self.bool(*v);
            }
            SortValue::Custom(name) => {
                return Err(CodecError::unsupported(format!(
                    "custom sort value '{}' has no wire form",
                    name
                )))
            }
        }
        Ok(())
    }

    fn sort_values(&mut self, values: &[SortValue]) -> CodecResult<()> {
        self.varint(values.len() as u64);
        for value in values {
            self.sort_value(value)?;
        }
        Ok(())
    }

    fn sort_spec(&mut self, spec: &SortSpec) -> CodecResult<()> {
        self.varint(spec.len() as u64);
        for field in spec.fields() {
            self.opt_bytes(field.field.as_deref().map(str::as_bytes));
            let tag = match &field.kind {
                SortFieldKind::Score => SF_SCORE,
                SortFieldKind::Doc => SF_DOC,
                SortFieldKind::Int => SF_INT,
                SortFieldKind::Long => SF_LONG,
                SortFieldKind::Float => SF_FLOAT,
                SortFieldKind::Double => SF_DOUBLE,
                SortFieldKind::Text => SF_TEXT,
                SortFieldKind::Custom(name) => {
                    return Err(CodecError::unsupported(format!(
                        "custom sort field '{}' has no wire form",
                        name
                    )))
                }
            };
            self.buf.put_u8(tag);
            self.bool(field.reverse);
        }
        Ok(())
    }

    fn hits(&mut self, hits: &[RankedHit]) -> CodecResult<()> {
        self.varint(hits.len() as u64);
        for hit in hits {
            self.varint(hit.doc_id as u64);
            self.buf.put_f32_le(hit.score);
            match &hit.sort_values {
                Some(values) => {
                    self.bool(true);
                    self.sort_values(values)?;
                }
                None => self.bool(false),
            }
        }
        Ok(())
    }

    fn ranked_set(&mut self, set: &RankedResultSet) -> CodecResult<()> {
        self.varint(set.total_hits);
        self.buf.put_f32_le(set.max_score);
        self.hits(&set.hits)
    }

    fn group_value(&mut self, value: &GroupValue) {
        match value {
            GroupValue::Null => self.buf.put_u8(GV_NULL),
            GroupValue::Long(v) => {
                self.buf.put_u8(GV_LONG);
                self.buf.put_i64_le(*v);
            }
            GroupValue::Double(v) => {
                self.buf.put_u8(GV_DOUBLE);
                self.buf.put_f64_le(*v);
            }
            GroupValue::Text(v) => {
                self.buf.put_u8(GV_TEXT);
                self.len_prefixed(v.as_bytes());
            }
            GroupValue::Bytes(v) => {
                self.buf.put_u8(GV_BYTES);
                self.len_prefixed(v);
            }
        }
    }

    fn grouped_set(&mut self, set: &GroupedResultSet) -> CodecResult<()> {
        self.sort_spec(&set.group_sort)?;
        self.sort_spec(&set.within_group_sort)?;
        self.varint(set.total_hit_count);
        self.varint(set.total_grouped_hit_count);
        match set.total_group_count {
            Some(count) => {
                self.bool(true);
                self.varint(count);
            }
            None => self.bool(false),
        }
        self.buf.put_f32_le(set.max_score);
        self.varint(set.groups.len() as u64);
        for group in &set.groups {
            self.group_value(&group.identity.value);
            self.sort_values(&group.identity.sort_values)?;
            self.buf.put_f32_le(group.score);
            self.varint(group.total_hits);
            self.buf.put_f32_le(group.max_score);
            self.hits(&group.hits)?;
        }
        Ok(())
    }
}

// ============================================================================
// Reader
// ============================================================================

struct WireReader<'a> {
    buf: &'a [u8],
}

impl<'a> WireReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn need(&self, n: usize, what: &str) -> CodecResult<()> {
        if self.buf.remaining() < n {
            return Err(CodecError::truncated(format!(
                "need {} bytes for {}, {} left",
                n,
                what,
                self.buf.remaining()
            )));
        }
        Ok(())
    }

    /// Reads the version and kind bytes.
    fn header(&mut self) -> CodecResult<u8> {
        self.need(2, "header")?;
        let version = self.buf.get_u8();
        if version != FORMAT_VERSION {
            return Err(CodecError::version_mismatch(version, FORMAT_VERSION));
        }
        Ok(self.buf.get_u8())
    }

    fn expect_kind(&mut self, expected: u8) -> CodecResult<()> {
        let kind = self.header()?;
        if kind != expected {
            return Err(CodecError::type_mismatch(format!(
                "expected kind {}, found {}",
                expected, kind
            )));
        }
        Ok(())
    }

    fn finish(&self) -> CodecResult<()> {
        if self.buf.has_remaining() {
            return Err(CodecError::malformed(format!(
                "{} trailing bytes",
                self.buf.remaining()
            )));
        }
        Ok(())
    }

    fn u8(&mut self) -> CodecResult<u8> {
        self.need(1, "tag")?;
        Ok(self.buf.get_u8())
    }

    fn bool(&mut self) -> CodecResult<bool> {
        match self.u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(CodecError::malformed(format!("invalid flag byte {}", other))),
        }
    }

    fn varint(&mut self) -> CodecResult<u64> {
        let mut value = 0u64;
        let mut shift = 0u32;
        loop {
            self.need(1, "varint")?;
            let byte = self.buf.get_u8();
            if shift == 63 && byte > 1 {
                return Err(CodecError::malformed("varint overflows 64 bits"));
            }
            value |= ((byte & 0x7f) as u64) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
            if shift > 63 {
                return Err(CodecError::malformed("varint overflows 64 bits"));
            }
        }
    }

    fn u32_varint(&mut self, what: &str) -> CodecResult<u32> {
        let value = self.varint()?;
        u32::try_from(value)
            .map_err(|_| CodecError::malformed(format!("{} {} exceeds 32 bits", what, value)))
    }

    /// Reads a count and checks it against the bytes left, each element
    /// taking at least `min_element` bytes.
    fn count(&mut self, min_element: usize, what: &str) -> CodecResult<usize> {
        let count = self.varint()?;
        let needed = count.saturating_mul(min_element as u64);
        if needed > self.buf.remaining() as u64 {
            return Err(CodecError::truncated(format!(
                "{} declares {} entries, only {} bytes left",
                what,
                count,
                self.buf.remaining()
            )));
        }
        Ok(count as usize)
    }

    fn f32(&mut self) -> CodecResult<f32> {
        self.need(4, "f32")?;
        Ok(self.buf.get_f32_le())
    }

    fn f64(&mut self) -> CodecResult<f64> {
        self.need(8, "f64")?;
        Ok(self.buf.get_f64_le())
    }

    fn i32(&mut self) -> CodecResult<i32> {
        self.need(4, "i32")?;
        Ok(self.buf.get_i32_le())
    }

    fn i64(&mut self) -> CodecResult<i64> {
        self.need(8, "i64")?;
        Ok(self.buf.get_i64_le())
    }

    fn len_prefixed(&mut self) -> CodecResult<Vec<u8>> {
        let len = self.count(1, "byte string")?;
        let data = self.buf[..len].to_vec();
        self.buf.advance(len);
        Ok(data)
    }

    fn string(&mut self) -> CodecResult<String> {
        String::from_utf8(self.len_prefixed()?)
            .map_err(|e| CodecError::malformed(format!("invalid UTF-8: {}", e)))
    }

    fn opt_bytes(&mut self) -> CodecResult<Option<Vec<u8>>> {
        if self.bool()? {
            Ok(Some(self.len_prefixed()?))
        } else {
            Ok(None)
        }
    }

    fn sort_value(&mut self) -> CodecResult<SortValue> {
        Ok(match self.u8()? {
            SV_NULL => SortValue::Null,
            SV_INT => SortValue::Int(self.i32()?),
            SV_LONG => SortValue::Long(self.i64()?),
            SV_FLOAT => SortValue::Float(self.f32()?),
            SV_DOUBLE => SortValue::Double(self.f64()?),
            SV_TEXT => SortValue::Text(self.string()?),
            SV_BYTES => SortValue::Bytes(self.len_prefixed()?),
            SV_BOOL => SortValue::Bool(self.bool()?),
            other => {
                return Err(CodecError::type_mismatch(format!(
                    "unknown sort value tag {}",
                    other
                )))
            }
        })
    }

    fn sort_values(&mut self) -> CodecResult<Vec<SortValue>> {
        let count = self.count(1, "sort values")?;
        (0..count).map(|_| self.sort_value()).collect()
    }

    fn sort_spec(&mut self) -> CodecResult<SortSpec> {
        let count = self.count(3, "sort spec")?;
        let mut fields = Vec::with_capacity(count);
        for _ in 0..count {
            let field = match self.opt_bytes()? {
                Some(raw) => Some(
                    String::from_utf8(raw)
                        .map_err(|e| CodecError::malformed(format!("invalid UTF-8: {}", e)))?,
                ),
                None => None,
            };
            let kind = match self.u8()? {
                SF_SCORE => SortFieldKind::Score,
                SF_DOC => SortFieldKind::Doc,
                SF_INT => SortFieldKind::Int,
                SF_LONG => SortFieldKind::Long,
                SF_FLOAT => SortFieldKind::Float,
                SF_DOUBLE => SortFieldKind::Double,
                SF_TEXT => SortFieldKind::Text,
                other => {
                    return Err(CodecError::type_mismatch(format!(
                        "unknown sort field tag {}",
                        other
                    )))
                }
            };
            let reverse = self.bool()?;
            fields.push(SortField {
                field,
                kind,
                reverse,
            });
        }
        Ok(SortSpec::new(fields))
    }

    fn hits(&mut self) -> CodecResult<Vec<RankedHit>> {
        // doc id, score and presence flag: at least 6 bytes per hit
        let count = self.count(6, "hits")?;
        let mut hits = Vec::with_capacity(count);
        for _ in 0..count {
            let doc_id = self.u32_varint("doc id")?;
            let score = self.f32()?;
            let sort_values = if self.bool()? {
                Some(self.sort_values()?)
            } else {
                None
            };
            hits.push(RankedHit {
                doc_id,
                score,
                sort_values,
            });
        }
        Ok(hits)
    }

    fn ranked_set(&mut self) -> CodecResult<RankedResultSet> {
        let total_hits = self.varint()?;
        let max_score = self.f32()?;
        let hits = self.hits()?;
        Ok(RankedResultSet {
            total_hits,
            max_score,
            hits,
        })
    }

    fn group_value(&mut self) -> CodecResult<GroupValue> {
        Ok(match self.u8()? {
            GV_NULL => GroupValue::Null,
            GV_LONG => GroupValue::Long(self.i64()?),
            GV_DOUBLE => GroupValue::Double(self.f64()?),
            GV_TEXT => GroupValue::Text(self.string()?),
            GV_BYTES => GroupValue::Bytes(self.len_prefixed()?),
            other => {
                return Err(CodecError::type_mismatch(format!(
                    "unknown group value tag {}",
                    other
                )))
            }
        })
    }

    fn grouped_set(&mut self) -> CodecResult<GroupedResultSet> {
        let group_sort = self.sort_spec()?;
        let within_group_sort = self.sort_spec()?;
        let total_hit_count = self.varint()?;
        let total_grouped_hit_count = self.varint()?;
        let total_group_count = if self.bool()? {
            Some(self.varint()?)
        } else {
            None
        };
        let max_score = self.f32()?;
        // tag, sort value count, score, total, max score, hit count
        let count = self.count(12, "groups")?;
        let mut groups = Vec::with_capacity(count);
        for _ in 0..count {
            let value = self.group_value()?;
            let sort_values = self.sort_values()?;
            let score = self.f32()?;
            let total_hits = self.varint()?;
            let group_max = self.f32()?;
            let hits = self.hits()?;
            groups.push(GroupResult {
                identity: GroupIdentity { value, sort_values },
                max_score: group_max,
                score,
                total_hits,
                hits,
            });
        }
        Ok(GroupedResultSet {
            group_sort,
            within_group_sort,
            total_hit_count,
            total_grouped_hit_count,
            total_group_count,
            max_score,
            groups,
        })
    }
}
