//! Marker-driven value serializer/deserializer (§4.4, binary format
//! authoritative).
//!
//! Dispatch is a range match on the marker byte rather than a 256-entry
//! function table: the match arms still resolve in O(1) but the table
//! itself never has to be built or indexed (§9).

use std::io::{Read, Write};

use byteorder::{BigEndian, ByteOrder};
use bytes::Bytes;

use crate::error::{Error, ErrorKind, Fallible};
use crate::value::{Identity, Node, Path, Relationship, Struct, UnboundRelationship, Value, ValueMap};

mod marker {
    pub const TINY_INT_POS_MAX: u8 = 0x7F;
    pub const TINY_INT_NEG_MIN: u8 = 0xF0;
    pub const TINY_STRING: u8 = 0x80;
    pub const TINY_LIST: u8 = 0x90;
    pub const TINY_MAP: u8 = 0xA0;
    pub const TINY_STRUCT: u8 = 0xB0;
    pub const NULL: u8 = 0xC0;
    pub const FLOAT64: u8 = 0xC1;
    pub const FALSE: u8 = 0xC2;
    pub const TRUE: u8 = 0xC3;
    pub const INT8: u8 = 0xC8;
    pub const INT16: u8 = 0xC9;
    pub const INT32: u8 = 0xCA;
    pub const INT64: u8 = 0xCB;
    pub const BYTES8: u8 = 0xCC;
    pub const BYTES16: u8 = 0xCD;
    pub const BYTES32: u8 = 0xCE;
    pub const STRING8: u8 = 0xD0;
    pub const STRING16: u8 = 0xD1;
    pub const STRING32: u8 = 0xD2;
    pub const LIST8: u8 = 0xD4;
    pub const LIST16: u8 = 0xD5;
    pub const LIST32: u8 = 0xD6;
    pub const MAP8: u8 = 0xD8;
    pub const MAP16: u8 = 0xD9;
    pub const MAP32: u8 = 0xDA;
    pub const STRUCT8: u8 = 0xDC;
    pub const STRUCT16: u8 = 0xDD;
}

mod signature {
    pub const NODE: u8 = 0x4E;
    pub const RELATIONSHIP: u8 = 0x52;
    pub const UNBOUND_RELATIONSHIP: u8 = 0x72;
    pub const PATH: u8 = 0x50;
}

fn protocol_error(context: impl Into<String>) -> Error {
    Error::with_context(ErrorKind::UnexpectedError, context.into())
}

// ---------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------

pub fn encode_value<W: Write>(value: &Value, out: &mut W) -> Fallible<()> {
    match value {
        Value::Null => out.write_all(&[marker::NULL]).map_err(Error::from),
        Value::Bool(b) => out
            .write_all(&[if *b { marker::TRUE } else { marker::FALSE }])
            .map_err(Error::from),
        Value::Int(i) => encode_int(*i, out),
        Value::Float(f) => {
            out.write_all(&[marker::FLOAT64])?;
            let mut buf = [0u8; 8];
            BigEndian::write_f64(&mut buf, *f);
            out.write_all(&buf).map_err(Error::from)
        }
        Value::String(s) => encode_string(s, out),
        Value::Bytes(b) => encode_bytes(b, out),
        Value::List(items) => encode_list(items, out),
        Value::Map(m) => encode_map(m, out),
        Value::Identity(id) => encode_int(id.get(), out),
        Value::Struct(s) => encode_struct(s.signature, &s.fields, out),
        Value::Node(n) => encode_node(n, out),
        Value::Relationship(r) => encode_relationship(r, out),
        Value::UnboundRelationship(r) => encode_unbound_relationship(r, out),
        Value::Path(p) => encode_path(p, out),
    }
}

fn encode_int<W: Write>(i: i64, out: &mut W) -> Fallible<()> {
    if i >= -16 && i <= 127 {
        out.write_all(&[i as i8 as u8])?;
    } else if i >= i8::min_value() as i64 && i <= i8::max_value() as i64 {
        out.write_all(&[marker::INT8, i as i8 as u8])?;
    } else if i >= i16::min_value() as i64 && i <= i16::max_value() as i64 {
        let mut buf = [0u8; 2];
        BigEndian::write_i16(&mut buf, i as i16);
        out.write_all(&[marker::INT16])?;
        out.write_all(&buf)?;
    } else if i >= i32::min_value() as i64 && i <= i32::max_value() as i64 {
        let mut buf = [0u8; 4];
        BigEndian::write_i32(&mut buf, i as i32);
        out.write_all(&[marker::INT32])?;
        out.write_all(&buf)?;
    } else {
        let mut buf = [0u8; 8];
        BigEndian::write_i64(&mut buf, i);
        out.write_all(&[marker::INT64])?;
        out.write_all(&buf)?;
    }
    Ok(())
}

fn encode_sized_marker<W: Write>(
    out: &mut W,
    len: usize,
    tiny_base: u8,
    tiny_max: usize,
    m8: u8,
    m16: Option<u8>,
    m32: Option<u8>,
) -> Fallible<()> {
    if len <= tiny_max {
        out.write_all(&[tiny_base | len as u8])?;
    } else if len <= u8::max_value() as usize {
        out.write_all(&[m8, len as u8])?;
    } else if m16.is_some() && len <= u16::max_value() as usize {
        let mut buf = [0u8; 2];
        BigEndian::write_u16(&mut buf, len as u16);
        out.write_all(&[m16.unwrap()])?;
        out.write_all(&buf)?;
    } else {
        let m32 = m32.ok_or_else(|| protocol_error("value too large to encode"))?;
        let mut buf = [0u8; 4];
        BigEndian::write_u32(&mut buf, len as u32);
        out.write_all(&[m32])?;
        out.write_all(&buf)?;
    }
    Ok(())
}

fn encode_string<W: Write>(s: &str, out: &mut W) -> Fallible<()> {
    let bytes = s.as_bytes();
    encode_sized_marker(
        out,
        bytes.len(),
        marker::TINY_STRING,
        0x0F,
        marker::STRING8,
        Some(marker::STRING16),
        Some(marker::STRING32),
    )?;
    out.write_all(bytes).map_err(Error::from)
}

fn encode_bytes<W: Write>(b: &[u8], out: &mut W) -> Fallible<()> {
    // Bytes have no tiny form, unlike strings/lists/maps/structs.
    let len = b.len();
    if len <= u8::max_value() as usize {
        out.write_all(&[marker::BYTES8, len as u8])?;
    } else if len <= u16::max_value() as usize {
        let mut buf = [0u8; 2];
        BigEndian::write_u16(&mut buf, len as u16);
        out.write_all(&[marker::BYTES16])?;
        out.write_all(&buf)?;
    } else {
        let mut buf = [0u8; 4];
        BigEndian::write_u32(&mut buf, len as u32);
        out.write_all(&[marker::BYTES32])?;
        out.write_all(&buf)?;
    }
    out.write_all(b).map_err(Error::from)
}

fn encode_list<W: Write>(items: &[Value], out: &mut W) -> Fallible<()> {
    encode_sized_marker(
        out,
        items.len(),
        marker::TINY_LIST,
        0x0F,
        marker::LIST8,
        Some(marker::LIST16),
        Some(marker::LIST32),
    )?;
    for item in items {
        encode_value(item, out)?;
    }
    Ok(())
}

fn encode_map<W: Write>(m: &ValueMap, out: &mut W) -> Fallible<()> {
    encode_sized_marker(
        out,
        m.len(),
        marker::TINY_MAP,
        0x0F,
        marker::MAP8,
        Some(marker::MAP16),
        Some(marker::MAP32),
    )?;
    for (k, v) in m.iter() {
        encode_string(k, out)?;
        encode_value(v, out)?;
    }
    Ok(())
}

fn encode_struct<W: Write>(signature: u8, fields: &[Value], out: &mut W) -> Fallible<()> {
    if fields.len() <= 0x0F {
        out.write_all(&[marker::TINY_STRUCT | fields.len() as u8])?;
    } else if fields.len() <= u8::max_value() as usize {
        out.write_all(&[marker::STRUCT8, fields.len() as u8])?;
    } else if fields.len() <= u16::max_value() as usize {
        let mut buf = [0u8; 2];
        BigEndian::write_u16(&mut buf, fields.len() as u16);
        out.write_all(&[marker::STRUCT16])?;
        out.write_all(&buf)?;
    } else {
        return Err(protocol_error("struct has too many fields to encode"));
    }
    out.write_all(&[signature])?;
    for field in fields {
        encode_value(field, out)?;
    }
    Ok(())
}

fn encode_node<W: Write>(n: &Node, out: &mut W) -> Fallible<()> {
    encode_struct(
        signature::NODE,
        &[
            Value::Identity(n.id),
            Value::List(n.labels.iter().cloned().map(Value::String).collect()),
            Value::Map(n.properties.clone()),
        ],
        out,
    )
}

fn encode_relationship<W: Write>(r: &Relationship, out: &mut W) -> Fallible<()> {
    encode_struct(
        signature::RELATIONSHIP,
        &[
            Value::Identity(r.id),
            Value::Identity(r.start),
            Value::Identity(r.end),
            Value::String(r.rel_type.clone()),
            Value::Map(r.properties.clone()),
        ],
        out,
    )
}

fn encode_unbound_relationship<W: Write>(r: &UnboundRelationship, out: &mut W) -> Fallible<()> {
    encode_struct(
        signature::UNBOUND_RELATIONSHIP,
        &[
            Value::Identity(r.id),
            Value::String(r.rel_type.clone()),
            Value::Map(r.properties.clone()),
        ],
        out,
    )
}

fn encode_path<W: Write>(p: &Path, out: &mut W) -> Fallible<()> {
    encode_struct(
        signature::PATH,
        &[
            Value::List(p.nodes.iter().cloned().map(Value::Node).collect()),
            Value::List(
                p.rels
                    .iter()
                    .cloned()
                    .map(Value::UnboundRelationship)
                    .collect(),
            ),
            Value::List(p.sequence.iter().map(|i| Value::Int(*i)).collect()),
        ],
        out,
    )
}

// ---------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------

pub fn decode_value<R: Read>(input: &mut R) -> Fallible<Value> {
    let marker = read_u8(input)?;
    decode_with_marker(marker, input)
}

fn decode_with_marker<R: Read>(marker: u8, input: &mut R) -> Fallible<Value> {
    match marker {
        0x00..=marker::TINY_INT_POS_MAX => Ok(Value::Int(marker as i8 as i64)),
        marker::TINY_INT_NEG_MIN..=0xFF => Ok(Value::Int(marker as i8 as i64)),
        marker::TINY_STRING..=0x8F => decode_string_of_len(input, (marker & 0x0F) as usize),
        marker::TINY_LIST..=0x9F => decode_list_of_len(input, (marker & 0x0F) as usize),
        marker::TINY_MAP..=0xAF => decode_map_of_len(input, (marker & 0x0F) as usize),
        marker::TINY_STRUCT..=0xBF => decode_struct_of_len(input, (marker & 0x0F) as usize),
        marker::NULL => Ok(Value::Null),
        marker::FLOAT64 => {
            let mut buf = [0u8; 8];
            input.read_exact(&mut buf)?;
            Ok(Value::Float(BigEndian::read_f64(&buf)))
        }
        marker::FALSE => Ok(Value::Bool(false)),
        marker::TRUE => Ok(Value::Bool(true)),
        marker::INT8 => Ok(Value::Int(read_u8(input)? as i8 as i64)),
        marker::INT16 => {
            let mut buf = [0u8; 2];
            input.read_exact(&mut buf)?;
            Ok(Value::Int(BigEndian::read_i16(&buf) as i64))
        }
        marker::INT32 => {
            let mut buf = [0u8; 4];
            input.read_exact(&mut buf)?;
            Ok(Value::Int(BigEndian::read_i32(&buf) as i64))
        }
        marker::INT64 => {
            let mut buf = [0u8; 8];
            input.read_exact(&mut buf)?;
            Ok(Value::Int(BigEndian::read_i64(&buf)))
        }
        marker::BYTES8 => {
            let len = read_u8(input)? as usize;
            decode_bytes_of_len(input, len)
        }
        marker::BYTES16 => {
            let len = read_u16(input)? as usize;
            decode_bytes_of_len(input, len)
        }
        marker::BYTES32 => {
            let len = read_u32(input)? as usize;
            decode_bytes_of_len(input, len)
        }
        marker::STRING8 => {
            let len = read_u8(input)? as usize;
            decode_string_of_len(input, len)
        }
        marker::STRING16 => {
            let len = read_u16(input)? as usize;
            decode_string_of_len(input, len)
        }
        marker::STRING32 => {
            let len = read_u32(input)? as usize;
            decode_string_of_len(input, len)
        }
        marker::LIST8 => {
            let len = read_u8(input)? as usize;
            decode_list_of_len(input, len)
        }
        marker::LIST16 => {
            let len = read_u16(input)? as usize;
            decode_list_of_len(input, len)
        }
        marker::LIST32 => {
            let len = read_u32(input)? as usize;
            decode_list_of_len(input, len)
        }
        marker::MAP8 => {
            let len = read_u8(input)? as usize;
            decode_map_of_len(input, len)
        }
        marker::MAP16 => {
            let len = read_u16(input)? as usize;
            decode_map_of_len(input, len)
        }
        marker::MAP32 => {
            let len = read_u32(input)? as usize;
            decode_map_of_len(input, len)
        }
        marker::STRUCT8 => {
            let len = read_u8(input)? as usize;
            decode_struct_of_len(input, len)
        }
        marker::STRUCT16 => {
            let len = read_u16(input)? as usize;
            decode_struct_of_len(input, len)
        }
        _ => Err(protocol_error(format!("unassigned marker 0x{:02X}", marker))),
    }
}

fn read_u8<R: Read>(input: &mut R) -> Fallible<u8> {
    let mut buf = [0u8; 1];
    input.read_exact(&mut buf)?;
    Ok(buf[0])
}

fn read_u16<R: Read>(input: &mut R) -> Fallible<u16> {
    let mut buf = [0u8; 2];
    input.read_exact(&mut buf)?;
    Ok(BigEndian::read_u16(&buf))
}

fn read_u32<R: Read>(input: &mut R) -> Fallible<u32> {
    let mut buf = [0u8; 4];
    input.read_exact(&mut buf)?;
    Ok(BigEndian::read_u32(&buf))
}

fn decode_bytes_of_len<R: Read>(input: &mut R, len: usize) -> Fallible<Value> {
    let mut buf = vec![0u8; len];
    input.read_exact(&mut buf)?;
    Ok(Value::Bytes(Bytes::from(buf)))
}

fn decode_string_of_len<R: Read>(input: &mut R, len: usize) -> Fallible<Value> {
    let mut buf = vec![0u8; len];
    input.read_exact(&mut buf)?;
    let s = String::from_utf8(buf).map_err(|e| protocol_error(format!("invalid utf-8 string: {}", e)))?;
    Ok(Value::String(s))
}

fn decode_list_of_len<R: Read>(input: &mut R, len: usize) -> Fallible<Value> {
    let mut items = Vec::with_capacity(len);
    for _ in 0..len {
        items.push(decode_value(input)?);
    }
    Ok(Value::List(items))
}

fn decode_map_of_len<R: Read>(input: &mut R, len: usize) -> Fallible<Value> {
    let mut map = ValueMap::new();
    for _ in 0..len {
        let key = decode_value(input)?;
        let key = match key {
            Value::String(s) => s,
            other => {
                return Err(Error::with_context(
                    ErrorKind::InvalidMapKeyType,
                    format!("map key must be a string, found {:?}", other),
                ))
            }
        };
        let value = decode_value(input)?;
        map.insert(key, value);
    }
    Ok(Value::Map(map))
}

fn decode_struct_of_len<R: Read>(input: &mut R, field_count: usize) -> Fallible<Value> {
    let signature = read_u8(input)?;
    let mut fields = Vec::with_capacity(field_count);
    for _ in 0..field_count {
        fields.push(decode_value(input)?);
    }
    decode_known_struct(signature, fields)
}

fn decode_known_struct(signature: u8, mut fields: Vec<Value>) -> Fallible<Value> {
    match signature {
        signature::NODE if fields.len() == 3 => {
            let properties = expect_map(fields.pop().unwrap(), "Node.properties")?;
            let labels = expect_list(fields.pop().unwrap(), "Node.labels")?
                .into_iter()
                .map(|v| expect_string(v, "Node.labels[]"))
                .collect::<Fallible<Vec<_>>>()
                .map_err(|_| Error::from(ErrorKind::InvalidLabelType))?;
            let id = expect_identity(fields.pop().unwrap(), "Node.id")?;
            Ok(Value::Node(Node {
                id,
                labels,
                properties,
            }))
        }
        signature::RELATIONSHIP if fields.len() == 5 => {
            let properties = expect_map(fields.pop().unwrap(), "Relationship.properties")?;
            let rel_type = expect_string(fields.pop().unwrap(), "Relationship.type")?;
            let end = expect_identity(fields.pop().unwrap(), "Relationship.end")?;
            let start = expect_identity(fields.pop().unwrap(), "Relationship.start")?;
            let id = expect_identity(fields.pop().unwrap(), "Relationship.id")?;
            Ok(Value::Relationship(Relationship {
                id,
                start,
                end,
                rel_type,
                properties,
            }))
        }
        signature::UNBOUND_RELATIONSHIP if fields.len() == 3 => {
            let properties = expect_map(fields.pop().unwrap(), "UnboundRelationship.properties")?;
            let rel_type = expect_string(fields.pop().unwrap(), "UnboundRelationship.type")?;
            let id = expect_identity(fields.pop().unwrap(), "UnboundRelationship.id")?;
            Ok(Value::UnboundRelationship(UnboundRelationship {
                id,
                rel_type,
                properties,
            }))
        }
        signature::PATH if fields.len() == 3 => decode_path(fields),
        _ => Ok(Value::Struct(Struct { signature, fields })),
    }
}

fn decode_path(mut fields: Vec<Value>) -> Fallible<Value> {
    let sequence_values = expect_list(fields.pop().unwrap(), "Path.sequence")?;
    let rels_values = expect_list(fields.pop().unwrap(), "Path.rels")?;
    let nodes_values = expect_list(fields.pop().unwrap(), "Path.nodes")?;

    let nodes = nodes_values
        .into_iter()
        .map(|v| match v {
            Value::Node(n) => Ok(n),
            _ => Err(Error::from(ErrorKind::InvalidPathNodeType)),
        })
        .collect::<Fallible<Vec<_>>>()?;

    let rels = rels_values
        .into_iter()
        .map(|v| match v {
            Value::UnboundRelationship(r) => Ok(r),
            _ => Err(Error::from(ErrorKind::InvalidPathRelationshipType)),
        })
        .collect::<Fallible<Vec<_>>>()?;

    if sequence_values.len() % 2 != 0 {
        return Err(Error::from(ErrorKind::InvalidPathSequenceLength));
    }

    let mut sequence = Vec::with_capacity(sequence_values.len());
    for (idx, v) in sequence_values.into_iter().enumerate() {
        let n = match v {
            Value::Int(n) => n,
            _ => return Err(Error::from(ErrorKind::InvalidPathSequenceIdxType)),
        };
        let is_rel_slot = idx % 2 == 0;
        if is_rel_slot {
            let rel_idx = n.unsigned_abs() as usize;
            if n == 0 || rel_idx > rels.len() {
                return Err(Error::from(ErrorKind::InvalidPathSequenceIdxRange));
            }
        } else if n < 0 || n as usize >= nodes.len() {
            return Err(Error::from(ErrorKind::InvalidPathSequenceIdxRange));
        }
        sequence.push(n);
    }

    Ok(Value::Path(Path {
        nodes,
        rels,
        sequence,
    }))
}

fn expect_map(v: Value, context: &str) -> Fallible<ValueMap> {
    match v {
        Value::Map(m) => Ok(m),
        _ => Err(protocol_error(format!("{} must be a map", context))),
    }
}

fn expect_list(v: Value, context: &str) -> Fallible<Vec<Value>> {
    match v {
        Value::List(items) => Ok(items),
        _ => Err(protocol_error(format!("{} must be a list", context))),
    }
}

fn expect_string(v: Value, context: &str) -> Fallible<String> {
    match v {
        Value::String(s) => Ok(s),
        _ => Err(protocol_error(format!("{} must be a string", context))),
    }
}

fn expect_identity(v: Value, context: &str) -> Fallible<Identity> {
    match v {
        Value::Int(i) if i >= 0 => Ok(Identity::new(i)),
        _ => Err(protocol_error(format!("{} must be a non-negative int", context))),
    }
}
