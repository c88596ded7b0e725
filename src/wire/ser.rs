//! Generic facet-driven serialization, the mirror of [`super::de`].
//!
//! Values are upcode-escaped per field (see [`super::upcode`]); this is
//! only used for the fixed-shape, all-scalar records in [`super::acks`].
//! Outgoing commands ([`super::commands`]) and [`Message`](crate::message)
//! have bespoke serialization because they need filtering rules the
//! generic walk below doesn't express (internal-key and empty-value
//! skipping, an unescaped text field for `%%>output`).

use facet::{Def, Facet, HasFields, Peek, PeekMap};

#[derive(Default)]
struct Serializer {
    parts: Vec<String>,
}

impl Serializer {
    fn serialize_tag(&mut self, tag: &str) {
        self.parts.push(tag.to_string());
    }

    fn serialize_scalar(&mut self, peek: Peek<'_, 'static>) {
        self.parts
            .push(super::upcode::encode(&peek.to_string()).into_owned());
    }

    fn serialize_map(&mut self, peek: PeekMap<'_, 'static>) {
        for (k, v) in peek.iter() {
            self.serialize_value(k);
            let k = self.parts.pop().expect("key not serialized");

            self.serialize_value(v);
            let v = self.parts.pop().expect("value not serialized");

            self.parts.push(format!("{k}={v}"));
        }
    }

    fn serialize_value(&mut self, peek: Peek<'_, 'static>) {
        if let Some(tag) = peek.shape().type_tag {
            self.serialize_tag(tag);
        };

        if let Ok(peek) = peek.into_struct() {
            for (_, peek) in peek.fields_for_serialize() {
                self.serialize_value(peek);
            }
        } else if let Ok(peek) = peek.into_map() {
            self.serialize_map(peek);
        } else {
            match peek.shape().def {
                Def::Scalar => self.serialize_scalar(peek),
                _ => panic!(
                    "unable to serialize type `{}`, stopped at {:?}",
                    peek.shape().type_identifier,
                    self.parts
                ),
            }
        }
    }

    fn serialize(mut self, peek: Peek<'_, 'static>) -> String {
        self.serialize_value(peek);

        self.parts.join(":")
    }
}

/// Serialize an instance of `T` to its wire-line representation.
pub fn to_string<T: Facet<'static>>(value: &T) -> String {
    let peek = Peek::new(value);

    Serializer::default().serialize(peek)
}
