use serde::de::Visitor;
use serde::{Deserialize, Serialize};

/// A unique identifier for a compilation request. It should only be
/// constructed via `RequestRegistry::create`.
///
#[derive(Copy, Default, Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct RequestId(u128);

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        "Request(".fmt(f)?;
        uuid::Uuid::from_u128_le(self.0).fmt(f)?;
        ")".fmt(f)?;
        Ok(())
    }
}

impl RequestId {
    pub(crate) fn next() -> Self {
        Self(uuid::Uuid::new_v4().to_u128_le())
    }
}

impl Serialize for RequestId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&uuid::Uuid::from_u128_le(self.0).to_string())
    }
}

struct RequestIdVisitor;

impl Visitor<'_> for RequestIdVisitor {
    type Value = RequestId;

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        let uuid = uuid::Uuid::parse_str(v).map_err(serde::de::Error::custom)?;
        Ok(RequestId(uuid.to_u128_le()))
    }

    fn expecting(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        fmt.write_str("a uuid string")
    }
}

impl<'de> Deserialize<'de> for RequestId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_str(RequestIdVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    impl quickcheck::Arbitrary for RequestId {
        fn arbitrary(_g: &mut quickcheck::Gen) -> Self {
            RequestId::next()
        }
    }

    #[test]
    fn fresh_ids_are_distinct() {
        assert_ne!(RequestId::next(), RequestId::next());
    }
}
