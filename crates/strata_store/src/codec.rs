//! Key and value codecs mapping application fields to backend byte strings.
//!
//! Keys use a self-delimiting tagged tuple whose byte order matches the
//! logical order of the field values, so the ordered backend can compare
//! encoded keys with plain memcmp. Values use a compact length-prefixed
//! wire format that varies by data model.

use crate::error::{Error, Result};
use crate::table::{DataModel, Datum, Fields};

/// Type tag for string key/column values.
const TAG_STR: u8 = 0x01;
/// Type tag for signed integer values.
const TAG_INT: u8 = 0x02;
/// Type tag for float values.
const TAG_FLOAT: u8 = 0x03;
/// Type tag for raw byte values.
const TAG_BYTES: u8 = 0x04;

/// Value-encoding model tags, one per data model.
const MODEL_BINARY: u8 = 0x10;
const MODEL_ARRAY: u8 = 0x11;
const MODEL_HASH: u8 = 0x12;

fn datum_tag(d: &Datum) -> u8 {
    match d {
        Datum::Str(_) => TAG_STR,
        Datum::Int(_) => TAG_INT,
        Datum::Float(_) => TAG_FLOAT,
        Datum::Bytes(_) => TAG_BYTES,
    }
}

/// Append `data` in 0x00-escaped, 0x00 0x00-terminated form.
///
/// Escaping 0x00 as 0x00 0xFF keeps arbitrary bytes admissible while the
/// terminator still sorts below every continuation, so prefixes order
/// before their extensions.
fn push_escaped(out: &mut Vec<u8>, data: &[u8]) {
    for &b in data {
        if b == 0x00 {
            out.push(0x00);
            out.push(0xFF);
        } else {
            out.push(b);
        }
    }
    out.push(0x00);
    out.push(0x00);
}

/// Decode one escaped run starting at `data[*offset]`, advancing the offset
/// past the terminator.
fn read_escaped(data: &[u8], offset: &mut usize) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut i = *offset;
    while i < data.len() {
        let b = data[i];
        if b != 0x00 {
            out.push(b);
            i += 1;
            continue;
        }
        match data.get(i + 1) {
            Some(0x00) => {
                *offset = i + 2;
                return Ok(out);
            }
            Some(0xFF) => {
                out.push(0x00);
                i += 2;
            }
            _ => return Err(Error::Corrupt("bad escape in encoded key".into())),
        }
    }
    Err(Error::Corrupt("unterminated encoded key field".into()))
}

/// Encode an i64 so that the big-endian bytes order like the integer.
fn encode_int(v: i64) -> [u8; 8] {
    ((v as u64) ^ (1u64 << 63)).to_be_bytes()
}

fn decode_int(bytes: [u8; 8]) -> i64 {
    (u64::from_be_bytes(bytes) ^ (1u64 << 63)) as i64
}

/// Encode an f64 into 8 bytes that preserve numeric ordering under memcmp.
///
/// Negative values flip all bits, non-negative values flip only the sign
/// bit; NaN is rejected and -0.0 normalizes to +0.0.
fn encode_float(v: f64) -> Result<[u8; 8]> {
    if v.is_nan() {
        return Err(Error::KeyMismatch("NaN is not a valid key value".into()));
    }
    let v = if v == 0.0 { 0.0_f64 } else { v };
    let mut bits = v.to_bits();
    if bits & (1u64 << 63) != 0 {
        bits = !bits;
    } else {
        bits ^= 1u64 << 63;
    }
    Ok(bits.to_be_bytes())
}

fn decode_float(bytes: [u8; 8]) -> f64 {
    let mut bits = u64::from_be_bytes(bytes);
    if bits & (1u64 << 63) != 0 {
        bits ^= 1u64 << 63;
    } else {
        bits = !bits;
    }
    f64::from_bits(bits)
}

/// Append one order-preserving tagged datum.
fn push_key_datum(out: &mut Vec<u8>, d: &Datum) -> Result<()> {
    out.push(datum_tag(d));
    match d {
        Datum::Str(s) => push_escaped(out, s.as_bytes()),
        Datum::Bytes(b) => push_escaped(out, b),
        Datum::Int(v) => out.extend_from_slice(&encode_int(*v)),
        Datum::Float(v) => out.extend_from_slice(&encode_float(*v)?),
    }
    Ok(())
}

/// Decode one tagged datum starting at `data[*offset]`.
fn read_key_datum(data: &[u8], offset: &mut usize) -> Result<Datum> {
    let tag = *data
        .get(*offset)
        .ok_or_else(|| Error::Corrupt("truncated encoded key".into()))?;
    *offset += 1;
    match tag {
        TAG_STR => {
            let raw = read_escaped(data, offset)?;
            let s = String::from_utf8(raw)
                .map_err(|_| Error::Corrupt("non-utf8 string key field".into()))?;
            Ok(Datum::Str(s))
        }
        TAG_BYTES => Ok(Datum::Bytes(read_escaped(data, offset)?)),
        TAG_INT => Ok(Datum::Int(decode_int(read_fixed8(data, offset)?))),
        TAG_FLOAT => Ok(Datum::Float(decode_float(read_fixed8(data, offset)?))),
        other => Err(Error::Corrupt(format!("unknown key type tag {other}"))),
    }
}

fn read_fixed8(data: &[u8], offset: &mut usize) -> Result<[u8; 8]> {
    let end = *offset + 8;
    let slice = data
        .get(*offset..end)
        .ok_or_else(|| Error::Corrupt("truncated fixed-width key field".into()))?;
    let mut buf = [0u8; 8];
    buf.copy_from_slice(slice);
    *offset = end;
    Ok(buf)
}

/// Look up each `key_def` field in `fields`, in definition order.
///
/// The input may list fields in any order but must contain exactly the
/// defined fields, no more and no less.
fn order_by_def<'a>(key_def: &[String], fields: &'a Fields, what: &str) -> Result<Vec<&'a Datum>> {
    if fields.len() != key_def.len() {
        return Err(mismatch_error(
            what,
            format!("expected {} {what} fields, got {}", key_def.len(), fields.len()),
        ));
    }
    let mut out = Vec::with_capacity(key_def.len());
    for name in key_def {
        let value = fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
            .ok_or_else(|| mismatch_error(what, format!("missing {what} field {name}")))?;
        out.push(value);
    }
    Ok(out)
}

fn mismatch_error(what: &str, reason: String) -> Error {
    if what == "key" {
        Error::KeyMismatch(reason)
    } else {
        Error::ColumnMismatch(reason)
    }
}

/// Encode the key fields of a row into backend bytes.
pub fn encode_key(key_def: &[String], fields: &Fields) -> Result<Vec<u8>> {
    let ordered = order_by_def(key_def, fields, "key")?;
    let mut out = Vec::with_capacity(fields.len() * 12);
    for value in ordered {
        push_key_datum(&mut out, value)?;
    }
    Ok(out)
}

/// Decode backend key bytes back into named fields.
pub fn decode_key(key_def: &[String], bytes: &[u8]) -> Result<Fields> {
    let mut offset = 0usize;
    let mut values = Vec::with_capacity(key_def.len());
    while offset < bytes.len() {
        values.push(read_key_datum(bytes, &mut offset)?);
    }
    if values.len() != key_def.len() {
        return Err(Error::Corrupt(format!(
            "encoded key has {} fields, definition has {}",
            values.len(),
            key_def.len()
        )));
    }
    Ok(key_def.iter().cloned().zip(values).collect())
}

/// Encode the bytes used for ring routing.
///
/// Time-series tables sort with but hash without their timestamp component
/// (the first key field), so all points of one series land on one shard.
pub fn encode_hash_key(key_def: &[String], fields: &Fields, time_series: bool) -> Result<Vec<u8>> {
    let ordered = order_by_def(key_def, fields, "key")?;
    let skip = usize::from(time_series && key_def.len() > 1);
    let mut out = Vec::new();
    for value in ordered.into_iter().skip(skip) {
        push_key_datum(&mut out, value)?;
    }
    Ok(out)
}

/// Append one datum in plain length-prefixed form (values need no ordering).
fn push_value_datum(out: &mut Vec<u8>, d: &Datum) {
    out.push(datum_tag(d));
    match d {
        Datum::Str(s) => {
            out.extend_from_slice(&(s.len() as u32).to_be_bytes());
            out.extend_from_slice(s.as_bytes());
        }
        Datum::Bytes(b) => {
            out.extend_from_slice(&(b.len() as u32).to_be_bytes());
            out.extend_from_slice(b);
        }
        Datum::Int(v) => out.extend_from_slice(&v.to_be_bytes()),
        Datum::Float(v) => out.extend_from_slice(&v.to_bits().to_be_bytes()),
    }
}

fn read_value_datum(data: &[u8], offset: &mut usize) -> Result<Datum> {
    let tag = read_u8(data, offset)?;
    match tag {
        TAG_STR => {
            let raw = read_len_prefixed(data, offset)?;
            let s = String::from_utf8(raw)
                .map_err(|_| Error::Corrupt("non-utf8 string column".into()))?;
            Ok(Datum::Str(s))
        }
        TAG_BYTES => Ok(Datum::Bytes(read_len_prefixed(data, offset)?)),
        TAG_INT => Ok(Datum::Int(i64::from_be_bytes(read_fixed8(data, offset)?))),
        TAG_FLOAT => Ok(Datum::Float(f64::from_bits(u64::from_be_bytes(
            read_fixed8(data, offset)?,
        )))),
        other => Err(Error::Corrupt(format!("unknown column type tag {other}"))),
    }
}

fn push_name(out: &mut Vec<u8>, name: &str) {
    out.extend_from_slice(&(name.len() as u32).to_be_bytes());
    out.extend_from_slice(name.as_bytes());
}

fn read_name(data: &[u8], offset: &mut usize) -> Result<String> {
    let raw = read_len_prefixed(data, offset)?;
    String::from_utf8(raw).map_err(|_| Error::Corrupt("non-utf8 column name".into()))
}

/// Encode a row's non-key columns under the table's data model.
pub fn encode_value(model: DataModel, columns_def: &[String], columns: &Fields) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    match model {
        // The whole association, names included, exactly as given.
        DataModel::Binary => {
            out.push(MODEL_BINARY);
            out.extend_from_slice(&(columns.len() as u32).to_be_bytes());
            for (name, value) in columns {
                push_name(&mut out, name);
                push_value_datum(&mut out, value);
            }
        }
        // Positional values in declared order; the definition carries names.
        DataModel::Array => {
            let ordered = order_by_def(columns_def, columns, "column")?;
            out.push(MODEL_ARRAY);
            out.extend_from_slice(&(ordered.len() as u32).to_be_bytes());
            for value in ordered {
                push_value_datum(&mut out, value);
            }
        }
        // A map: canonicalize by sorting names so equal maps encode equal.
        DataModel::Hash => {
            let mut sorted: Vec<&(String, Datum)> = columns.iter().collect();
            sorted.sort_by(|a, b| a.0.cmp(&b.0));
            out.push(MODEL_HASH);
            out.extend_from_slice(&(sorted.len() as u32).to_be_bytes());
            for (name, value) in sorted {
                push_name(&mut out, name);
                push_value_datum(&mut out, value);
            }
        }
    }
    Ok(out)
}

/// Decode value bytes produced by `encode_value` with the same definitions.
pub fn decode_value(model: DataModel, columns_def: &[String], bytes: &[u8]) -> Result<Fields> {
    let mut offset = 0usize;
    let tag = read_u8(bytes, &mut offset)?;
    let expected = match model {
        DataModel::Binary => MODEL_BINARY,
        DataModel::Array => MODEL_ARRAY,
        DataModel::Hash => MODEL_HASH,
    };
    if tag != expected {
        return Err(Error::Corrupt(format!(
            "value model tag {tag:#04x} does not match table data model"
        )));
    }
    let count = read_u32(bytes, &mut offset)? as usize;
    let mut out = Vec::with_capacity(count);
    match model {
        DataModel::Binary | DataModel::Hash => {
            for _ in 0..count {
                let name = read_name(bytes, &mut offset)?;
                let value = read_value_datum(bytes, &mut offset)?;
                out.push((name, value));
            }
        }
        DataModel::Array => {
            if count != columns_def.len() {
                return Err(Error::Corrupt(format!(
                    "encoded row has {count} columns, definition has {}",
                    columns_def.len()
                )));
            }
            for name in columns_def {
                let value = read_value_datum(bytes, &mut offset)?;
                out.push((name.clone(), value));
            }
        }
    }
    Ok(out)
}

/// Build index terms for a row.
///
/// Secondary-index materialization is not implemented; any non-empty index
/// list is rejected so callers fail loudly instead of silently dropping
/// index maintenance.
pub fn encode_indexes(indexes: &[String], _columns: &Fields) -> Result<Vec<Vec<u8>>> {
    if indexes.is_empty() {
        return Ok(Vec::new());
    }
    Err(Error::NotSupported("secondary indexes"))
}

fn read_u8(data: &[u8], offset: &mut usize) -> Result<u8> {
    let b = *data
        .get(*offset)
        .ok_or_else(|| Error::Corrupt("truncated value".into()))?;
    *offset += 1;
    Ok(b)
}

fn read_u32(data: &[u8], offset: &mut usize) -> Result<u32> {
    let end = *offset + 4;
    let slice = data
        .get(*offset..end)
        .ok_or_else(|| Error::Corrupt("truncated value length".into()))?;
    let mut buf = [0u8; 4];
    buf.copy_from_slice(slice);
    *offset = end;
    Ok(u32::from_be_bytes(buf))
}

fn read_len_prefixed(data: &[u8], offset: &mut usize) -> Result<Vec<u8>> {
    let len = read_u32(data, offset)? as usize;
    let end = *offset + len;
    let slice = data
        .get(*offset..end)
        .ok_or_else(|| Error::Corrupt("truncated value payload".into()))?;
    *offset = end;
    Ok(slice.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defs(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn fields(pairs: &[(&str, Datum)]) -> Fields {
        pairs.iter().map(|(n, v)| (n.to_string(), v.clone())).collect()
    }

    #[test]
    fn key_roundtrip_all_types() {
        let key_def = defs(&["a", "b", "c", "d"]);
        let input = fields(&[
            ("a", Datum::Str("users".into())),
            ("b", Datum::Int(-42)),
            ("c", Datum::Float(3.5)),
            ("d", Datum::Bytes(vec![0x00, 0xFF, 0x00])),
        ]);
        let encoded = encode_key(&key_def, &input).unwrap();
        assert_eq!(decode_key(&key_def, &encoded).unwrap(), input);
    }

    #[test]
    fn key_encoding_is_field_order_insensitive() {
        let key_def = defs(&["a", "b"]);
        let forward = fields(&[("a", Datum::Int(1)), ("b", Datum::Int(2))]);
        let reversed = fields(&[("b", Datum::Int(2)), ("a", Datum::Int(1))]);
        assert_eq!(
            encode_key(&key_def, &forward).unwrap(),
            encode_key(&key_def, &reversed).unwrap()
        );
    }

    #[test]
    fn key_mismatch_on_missing_or_extra_fields() {
        let key_def = defs(&["a", "b"]);
        let missing = fields(&[("a", Datum::Int(1))]);
        assert!(matches!(
            encode_key(&key_def, &missing),
            Err(Error::KeyMismatch(_))
        ));
        let wrong = fields(&[("a", Datum::Int(1)), ("c", Datum::Int(3))]);
        assert!(matches!(
            encode_key(&key_def, &wrong),
            Err(Error::KeyMismatch(_))
        ));
    }

    #[test]
    fn key_order_matches_byte_order() {
        let key_def = defs(&["k"]);
        let encode = |d: Datum| encode_key(&key_def, &fields(&[("k", d)])).unwrap();

        // Integers, including across zero.
        let ints: Vec<i64> = vec![i64::MIN, -100, -1, 0, 1, 7, i64::MAX];
        for pair in ints.windows(2) {
            assert!(encode(Datum::Int(pair[0])) < encode(Datum::Int(pair[1])));
        }

        // Floats, including infinities.
        let floats = vec![f64::NEG_INFINITY, -1.5, -0.0, 0.25, 2.0, f64::INFINITY];
        for pair in floats.windows(2) {
            assert!(encode(Datum::Float(pair[0])) <= encode(Datum::Float(pair[1])));
        }

        // Byte strings where one is a prefix of the other, and embedded NULs.
        assert!(encode(Datum::Bytes(b"a".to_vec())) < encode(Datum::Bytes(b"a\x00".to_vec())));
        assert!(encode(Datum::Bytes(b"a\x00".to_vec())) < encode(Datum::Bytes(b"ab".to_vec())));
        assert!(encode(Datum::Str("car".into())) < encode(Datum::Str("cart".into())));
    }

    #[test]
    fn composite_key_orders_by_leading_field_first() {
        let key_def = defs(&["p", "s"]);
        let make = |p: &str, s: i64| {
            encode_key(
                &key_def,
                &fields(&[("p", Datum::Str(p.into())), ("s", Datum::Int(s))]),
            )
            .unwrap()
        };
        assert!(make("aaa", 999) < make("bbb", -999));
        assert!(make("aaa", 1) < make("aaa", 2));
    }

    #[test]
    fn nan_rejected_in_keys() {
        let key_def = defs(&["k"]);
        let input = fields(&[("k", Datum::Float(f64::NAN))]);
        assert!(matches!(
            encode_key(&key_def, &input),
            Err(Error::KeyMismatch(_))
        ));
    }

    #[test]
    fn hash_key_skips_timestamp_component() {
        let key_def = defs(&["ts", "series"]);
        let a = fields(&[("ts", Datum::Int(1)), ("series", Datum::Str("cpu".into()))]);
        let b = fields(&[("ts", Datum::Int(2)), ("series", Datum::Str("cpu".into()))]);
        assert_eq!(
            encode_hash_key(&key_def, &a, true).unwrap(),
            encode_hash_key(&key_def, &b, true).unwrap()
        );
        assert_ne!(
            encode_hash_key(&key_def, &a, false).unwrap(),
            encode_hash_key(&key_def, &b, false).unwrap()
        );
    }

    #[test]
    fn binary_value_roundtrip_returns_association_unchanged() {
        let cols = fields(&[
            ("y", Datum::Str("hello".into())),
            ("z", Datum::Bytes(vec![1, 2, 3])),
        ]);
        let encoded = encode_value(DataModel::Binary, &[], &cols).unwrap();
        assert_eq!(decode_value(DataModel::Binary, &[], &encoded).unwrap(), cols);
    }

    #[test]
    fn array_value_roundtrip_uses_positions() {
        let columns_def = defs(&["c1", "c2", "c3"]);
        // Input order differs from definition order; decode restores
        // definition order.
        let cols = fields(&[
            ("c3", Datum::Int(3)),
            ("c1", Datum::Int(1)),
            ("c2", Datum::Int(2)),
        ]);
        let encoded = encode_value(DataModel::Array, &columns_def, &cols).unwrap();
        let decoded = decode_value(DataModel::Array, &columns_def, &encoded).unwrap();
        assert_eq!(
            decoded,
            fields(&[
                ("c1", Datum::Int(1)),
                ("c2", Datum::Int(2)),
                ("c3", Datum::Int(3)),
            ])
        );
    }

    #[test]
    fn array_value_mismatch_on_missing_column() {
        let columns_def = defs(&["c1", "c2", "c3"]);
        let cols = fields(&[("c1", Datum::Str("a".into())), ("c3", Datum::Str("c".into()))]);
        assert!(matches!(
            encode_value(DataModel::Array, &columns_def, &cols),
            Err(Error::ColumnMismatch(_))
        ));
    }

    #[test]
    fn hash_value_roundtrip_is_canonical() {
        let cols_a = fields(&[("b", Datum::Int(2)), ("a", Datum::Int(1))]);
        let cols_b = fields(&[("a", Datum::Int(1)), ("b", Datum::Int(2))]);
        let enc_a = encode_value(DataModel::Hash, &[], &cols_a).unwrap();
        let enc_b = encode_value(DataModel::Hash, &[], &cols_b).unwrap();
        assert_eq!(enc_a, enc_b);
        assert_eq!(
            decode_value(DataModel::Hash, &[], &enc_a).unwrap(),
            fields(&[("a", Datum::Int(1)), ("b", Datum::Int(2))])
        );
    }

    #[test]
    fn index_terms_unsupported_for_nonempty_index_list() {
        assert!(encode_indexes(&[], &Vec::new()).unwrap().is_empty());
        assert!(matches!(
            encode_indexes(&defs(&["ix"]), &Vec::new()),
            Err(Error::NotSupported(_))
        ));
    }
}
