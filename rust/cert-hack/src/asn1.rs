//! DER helpers for the parts of the attestation schema the `der` crate cannot
//! express on its own: context-specific EXPLICIT tags in high-tag-number form
//! and verbatim splicing of already-encoded values.

use der::asn1::SetOfVec;
use der::{Decode, Encode, Header, Length, Reader, SliceReader, Tag, Writer};

/// A value wrapped in an `[tag] EXPLICIT` context-specific tag.
///
/// The der library does not support `TagNumber` values above 30, which the
/// attestation schema needs (e.g. `[704]` for the root of trust). The tag is
/// written by hand; length and value go through `der`.
pub(crate) struct ExplicitTaggedValue<T: Encode> {
    pub tag: u32,
    pub val: T,
}

impl<T: Encode> ExplicitTaggedValue<T> {
    fn explicit_tag_len(&self) -> der::Result<Length> {
        match self.tag {
            0..=0x1e => Ok(Length::ONE),
            0x1f..=0x7f => Ok(Length::new(2)),
            0x80..=0x3fff => Ok(Length::new(3)),
            _ => Err(der::ErrorKind::Overflow.into()),
        }
    }

    fn explicit_tag_encode(&self, writer: &mut impl Writer) -> der::Result<()> {
        match self.tag {
            // b101vvvvv is context-specific+constructed
            0..=0x1e => writer.write_byte(0b1010_0000 | self.tag as u8),
            0x1f..=0x7f => {
                writer.write_byte(0b1011_1111)?;
                writer.write_byte(self.tag as u8)
            }
            0x80..=0x3fff => {
                writer.write_byte(0b1011_1111)?;
                writer.write_byte((self.tag >> 7) as u8 | 0x80)?;
                writer.write_byte((self.tag & 0x7f) as u8)
            }
            _ => Err(der::ErrorKind::Overflow.into()),
        }
    }
}

impl<T: Encode> Encode for ExplicitTaggedValue<T> {
    fn encoded_len(&self) -> der::Result<Length> {
        let inner_len = self.val.encoded_len()?;
        self.explicit_tag_len() + inner_len.encoded_len()? + inner_len
    }

    fn encode(&self, writer: &mut impl Writer) -> der::Result<()> {
        let inner_len = self.val.encoded_len()?;
        self.explicit_tag_encode(writer)?;
        inner_len.encode(writer)?;
        self.val.encode(writer)
    }
}

/// Bytes that already hold a complete DER encoding, written unchanged.
pub(crate) struct RawDer<'a>(pub &'a [u8]);

impl Encode for RawDer<'_> {
    fn encoded_len(&self) -> der::Result<Length> {
        Length::try_from(self.0.len())
    }

    fn encode(&self, writer: &mut impl Writer) -> der::Result<()> {
        writer.write(self.0)
    }
}

/// Read the tag number of an `[n] EXPLICIT` field, accepting both the
/// low-tag and high-tag-number forms.
fn read_context_tag<'a>(reader: &mut impl Reader<'a>) -> der::Result<u32> {
    let first = reader.read_byte()?;
    if first & 0b1110_0000 != 0b1010_0000 {
        return Err(der::ErrorKind::TagUnknown { byte: first }.into());
    }
    let low = first & 0x1f;
    if low != 0x1f {
        return Ok(low as u32);
    }
    let mut tag = 0u32;
    // Tag numbers in this schema fit in two base-128 digits; allow up to four.
    for _ in 0..4 {
        let b = reader.read_byte()?;
        tag = (tag << 7) | (b & 0x7f) as u32;
        if b & 0x80 == 0 {
            return if tag < 0x1f {
                Err(der::ErrorKind::TagNumberInvalid.into())
            } else {
                Ok(tag)
            };
        }
    }
    Err(der::ErrorKind::TagNumberInvalid.into())
}

/// Split the contents of a SEQUENCE of explicit context-tagged fields into
/// `(tag number, inner DER)` pairs, in wire order.
pub(crate) fn explicit_fields(content: &[u8]) -> der::Result<Vec<(u32, &[u8])>> {
    let mut reader = SliceReader::new(content)?;
    let mut fields = Vec::new();
    while !reader.is_finished() {
        let tag = read_context_tag(&mut reader)?;
        let len = Length::decode(&mut reader)?;
        let inner = reader.read_slice(len)?;
        fields.push((tag, inner));
    }
    Ok(fields)
}

/// Build a DER SET OF INTEGER, dropping duplicates.
pub(crate) fn integer_set(values: &[i64]) -> der::Result<SetOfVec<i64>> {
    let mut values = values.to_vec();
    values.sort_unstable();
    values.dedup();
    SetOfVec::try_from(values)
}

/// Decode a DER SET OF INTEGER into its members.
pub(crate) fn decode_integer_set(bytes: &[u8]) -> der::Result<Vec<i64>> {
    Ok(SetOfVec::<i64>::from_der(bytes)?.iter().copied().collect())
}

fn constructed(tag: Tag, content: &[u8]) -> der::Result<Vec<u8>> {
    let mut out = Vec::with_capacity(content.len() + 4);
    Header::new(tag, Length::try_from(content.len())?)?.encode_to_vec(&mut out)?;
    out.extend_from_slice(content);
    Ok(out)
}

/// DER SET OF from already-encoded members: sorted by encoding, duplicates
/// dropped.
pub(crate) fn set_of_encoded(mut members: Vec<Vec<u8>>) -> der::Result<Vec<u8>> {
    members.sort();
    members.dedup();
    constructed(Tag::Set, &members.concat())
}

/// DER SEQUENCE from already-encoded members, in the given order.
pub(crate) fn sequence_of_encoded(members: &[Vec<u8>]) -> der::Result<Vec<u8>> {
    constructed(Tag::Sequence, &members.concat())
}

#[cfg(test)]
mod tests {
    use super::*;
    use der::asn1::Null;

    #[test]
    fn test_explicit_tagged_value() {
        assert_eq!(
            hex::encode(ExplicitTaggedValue { tag: 2, val: 16i64 }.to_der().unwrap()),
            "a203020110"
        );
        assert_eq!(
            hex::encode(ExplicitTaggedValue { tag: 2, val: Null }.to_der().unwrap()),
            "a2020500"
        );
        assert_eq!(
            hex::encode(ExplicitTaggedValue { tag: 503, val: 16i64 }.to_der().unwrap()),
            "bf837703020110"
        );
        assert_eq!(
            hex::encode(ExplicitTaggedValue { tag: 704, val: Null }.to_der().unwrap()),
            "bf8540020500"
        );
        assert_eq!(
            hex::encode(ExplicitTaggedValue { tag: 31, val: Null }.to_der().unwrap()),
            "bf1f020500"
        );
    }

    #[test]
    fn test_explicit_tag_overflow() {
        assert!(ExplicitTaggedValue { tag: 0x4000, val: Null }.to_der().is_err());
    }

    #[test]
    fn test_explicit_fields_mixed_forms() {
        // [1] { SET { 2 } }, [503] { NULL }, [704] { NULL }
        let content = hex::decode("a1053103020102bf8377020500bf8540020500").unwrap();
        let fields = explicit_fields(&content).unwrap();
        let tags: Vec<u32> = fields.iter().map(|(t, _)| *t).collect();
        assert_eq!(tags, vec![1, 503, 704]);
        assert_eq!(decode_integer_set(fields[0].1).unwrap(), vec![2]);
        assert_eq!(fields[1].1, &[0x05, 0x00]);
    }

    #[test]
    fn test_explicit_fields_rejects_universal_tags() {
        // INTEGER 1 where a context tag is expected
        assert!(explicit_fields(&[0x02, 0x01, 0x01]).is_err());
    }

    #[test]
    fn test_explicit_fields_rejects_truncated_value() {
        assert!(explicit_fields(&[0xa2, 0x03, 0x02, 0x01]).is_err());
    }

    #[test]
    fn test_raw_der_is_verbatim() {
        let tagged = ExplicitTaggedValue { tag: 709, val: RawDer(&[0x04, 0x01, 0xaa]) };
        assert_eq!(hex::encode(tagged.to_der().unwrap()), "bf8545030401aa");
    }

    #[test]
    fn test_integer_set_sorts_and_dedups() {
        let set = integer_set(&[3, 2, 3]).unwrap();
        assert_eq!(hex::encode(set.to_der().unwrap()), "3106020102020103");
    }

    #[test]
    fn test_set_of_encoded_orders_by_encoding() {
        let set = set_of_encoded(vec![
            vec![0x04, 0x02, 0xbb, 0xbb],
            vec![0x04, 0x01, 0xaa],
            vec![0x04, 0x01, 0xaa],
        ])
        .unwrap();
        assert_eq!(hex::encode(&set), "31070401aa0402bbbb");
        assert_eq!(hex::encode(set_of_encoded(Vec::new()).unwrap()), "3100");
    }

    #[test]
    fn test_sequence_of_encoded_keeps_order() {
        let seq = sequence_of_encoded(&[vec![0x31, 0x00], vec![0x05, 0x00]]).unwrap();
        assert_eq!(hex::encode(seq), "300431000500");
    }
}
