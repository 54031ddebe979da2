use crate::handle::Handle;
use serde::{
    de::{Error, SeqAccess, Visitor},
    ser::SerializeTuple,
    Deserialize, Deserializer, Serialize, Serializer,
};
use std::fmt::{self, Formatter};

// A handle is written as the triple `(table, epoch, slot)`. It only ever resolves against the
// table that produced it.
impl Serialize for Handle {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut tuple = serializer.serialize_tuple(3)?;
        tuple.serialize_element(&self.table())?;
        tuple.serialize_element(&self.epoch())?;
        tuple.serialize_element(&self.slot())?;
        tuple.end()
    }
}

impl<'de> Deserialize<'de> for Handle {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_tuple(3, HandleVisitor)
    }
}

struct HandleVisitor;

impl<'de> Visitor<'de> for HandleVisitor {
    type Value = Handle;

    fn expecting(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "a (table, epoch, slot) triple")
    }

    fn visit_seq<A>(self, mut access: A) -> Result<Self::Value, A::Error>
    where
        A: SeqAccess<'de>,
    {
        let table: u64 = access
            .next_element()?
            .ok_or_else(|| A::Error::invalid_length(0, &self))?;
        let epoch: u32 = access
            .next_element()?
            .ok_or_else(|| A::Error::invalid_length(1, &self))?;
        let slot: u64 = access
            .next_element()?
            .ok_or_else(|| A::Error::invalid_length(2, &self))?;
        Ok(Handle::new(table, epoch, slot))
    }
}
