use crate::BencodeValue;

fn write_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(bytes.len().to_string().as_bytes());
    out.push(b':');
    out.extend_from_slice(bytes);
}

fn serialize_into(value: &BencodeValue, out: &mut Vec<u8>) {
    match value {
        BencodeValue::Bytes(b) => write_bytes(out, b),
        BencodeValue::Integer(i) => {
            out.push(b'i');
            out.extend_from_slice(i.to_string().as_bytes());
            out.push(b'e');
        }
        BencodeValue::List(l) => {
            out.push(b'l');
            for item in l {
                serialize_into(item, out);
            }
            out.push(b'e');
        }
        BencodeValue::Dict(d) => {
            out.push(b'd');
            for (k, v) in d {
                write_bytes(out, k);
                serialize_into(v, out);
            }
            out.push(b'e');
        }
    }
}

impl BencodeValue {
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::new();
        serialize_into(self, &mut out);
        out
    }

    /// Appends the encoding to `out`.
    pub fn serialize_to(&self, out: &mut Vec<u8>) {
        serialize_into(self, out)
    }
}
