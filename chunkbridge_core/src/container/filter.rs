use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CodecError, FormatError};
use crate::profile::FILTER_FLAG_OPTIONAL;

/// One entry of a dataset's filter pipeline, as stored in the container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterDescription {
    pub id: u16,
    pub flags: u16,
    /// Filter-defined parameter block.
    pub cd_values: Vec<u32>,
}

impl FilterDescription {
    pub fn new(id: u16, cd_values: Vec<u32>) -> Self {
        Self {
            id,
            flags: 0,
            cd_values,
        }
    }

    pub fn is_optional(&self) -> bool {
        self.flags & FILTER_FLAG_OPTIONAL != 0
    }
}

/// A reversible transform applied to chunk bytes on their way to and from storage.
///
/// Typed writes run the pipeline front to back through [`Filter::encode`];
/// typed reads run it back to front through [`Filter::decode`].
pub trait Filter: Send + Sync {
    fn id(&self) -> u16;

    fn name(&self) -> &'static str;

    fn encode(
        &self,
        data: &[u8],
        cd_values: &[u32],
        element_size: usize,
    ) -> Result<Vec<u8>, CodecError>;

    /// Invert [`Filter::encode`]. `size_hint` is the decoded chunk size once
    /// the whole pipeline has run; intermediate stages may produce other sizes.
    fn decode(
        &self,
        data: &[u8],
        cd_values: &[u32],
        element_size: usize,
        size_hint: usize,
    ) -> Result<Vec<u8>, CodecError>;
}

/// Filters available to a container, keyed by id.
#[derive(Default)]
pub struct FilterRegistry {
    filters: BTreeMap<u16, Box<dyn Filter>>,
}

impl fmt::Debug for FilterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.filters.iter().map(|(id, filter)| (id, filter.name())))
            .finish()
    }
}

impl FilterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `filter`, returning any filter previously registered under its id.
    pub fn register(&mut self, filter: Box<dyn Filter>) -> Option<Box<dyn Filter>> {
        self.filters.insert(filter.id(), filter)
    }

    pub fn with(mut self, filter: Box<dyn Filter>) -> Self {
        self.register(filter);
        self
    }

    pub fn get(&self, id: u16) -> Option<&dyn Filter> {
        self.filters.get(&id).map(|f| f.as_ref())
    }

    pub fn contains(&self, id: u16) -> bool {
        self.filters.contains_key(&id)
    }

    pub fn ids(&self) -> impl Iterator<Item = u16> + '_ {
        self.filters.keys().copied()
    }

    /// Run `pipeline` forward over one chunk.
    ///
    /// Returns the stored bytes and the filter mask: bit `i` is set when
    /// optional filter `i` was skipped, either because it is not registered
    /// or because it failed.
    pub fn encode_pipeline(
        &self,
        pipeline: &[FilterDescription],
        data: &[u8],
        element_size: usize,
    ) -> Result<(Vec<u8>, u32), FormatError> {
        let mut current = data.to_vec();
        let mut mask = 0u32;
        for (i, desc) in pipeline.iter().enumerate() {
            let Some(filter) = self.get(desc.id) else {
                if desc.is_optional() {
                    mask |= 1 << i;
                    continue;
                }
                return Err(FormatError::UnregisteredFilter(desc.id));
            };
            match filter.encode(&current, &desc.cd_values, element_size) {
                Ok(next) => current = next,
                Err(_) if desc.is_optional() => {
                    tracing::debug!(filter = filter.name(), "optional filter skipped on write");
                    mask |= 1 << i;
                }
                Err(source) => {
                    return Err(FormatError::Filter {
                        id: desc.id,
                        name: filter.name(),
                        source,
                    })
                }
            }
        }
        Ok((current, mask))
    }

    /// Run `pipeline` in reverse over stored chunk bytes, skipping masked filters.
    pub fn decode_pipeline(
        &self,
        pipeline: &[FilterDescription],
        filter_mask: u32,
        stored: &[u8],
        element_size: usize,
        chunk_nbytes: usize,
    ) -> Result<Vec<u8>, FormatError> {
        let mut current = stored.to_vec();
        for (i, desc) in pipeline.iter().enumerate().rev() {
            if i < 32 && filter_mask & (1 << i) != 0 {
                continue;
            }
            let filter = self
                .get(desc.id)
                .ok_or(FormatError::UnregisteredFilter(desc.id))?;
            current = filter
                .decode(&current, &desc.cd_values, element_size, chunk_nbytes)
                .map_err(|source| FormatError::Filter {
                    id: desc.id,
                    name: filter.name(),
                    source,
                })?;
        }
        if current.len() != chunk_nbytes {
            return Err(FormatError::Corrupt(format!(
                "filter pipeline produced {} bytes, chunk holds {chunk_nbytes}",
                current.len()
            )));
        }
        Ok(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// XORs every byte with `cd_values[0]`.
    struct XorFilter;

    impl Filter for XorFilter {
        fn id(&self) -> u16 {
            300
        }

        fn name(&self) -> &'static str {
            "xor"
        }

        fn encode(&self, data: &[u8], cd: &[u32], _: usize) -> Result<Vec<u8>, CodecError> {
            let key = *cd
                .first()
                .ok_or_else(|| CodecError::InvalidParams("missing key".into()))? as u8;
            Ok(data.iter().map(|b| b ^ key).collect())
        }

        fn decode(&self, data: &[u8], cd: &[u32], size: usize, _: usize) -> Result<Vec<u8>, CodecError> {
            self.encode(data, cd, size)
        }
    }

    #[test]
    fn pipeline_inverts() {
        let registry = FilterRegistry::new().with(Box::new(XorFilter));
        let pipeline = vec![
            FilterDescription::new(300, vec![0x0f]),
            FilterDescription::new(300, vec![0xf0]),
        ];
        let (stored, mask) = registry.encode_pipeline(&pipeline, &[1, 2, 3], 1).unwrap();
        assert_eq!(mask, 0);
        assert_eq!(stored, vec![1 ^ 0xff, 2 ^ 0xff, 3 ^ 0xff]);
        let back = registry.decode_pipeline(&pipeline, mask, &stored, 1, 3).unwrap();
        assert_eq!(back, vec![1, 2, 3]);
    }

    #[test]
    fn optional_failures_are_masked() {
        let registry = FilterRegistry::new().with(Box::new(XorFilter));
        let mut broken = FilterDescription::new(300, vec![]);
        broken.flags = FILTER_FLAG_OPTIONAL;
        let mut missing = FilterDescription::new(999, vec![]);
        missing.flags = FILTER_FLAG_OPTIONAL;
        let pipeline = vec![broken, missing];
        let (stored, mask) = registry.encode_pipeline(&pipeline, &[7, 8], 1).unwrap();
        assert_eq!(stored, vec![7, 8]);
        assert_eq!(mask, 0b11);
        assert_eq!(registry.decode_pipeline(&pipeline, mask, &stored, 1, 2).unwrap(), vec![7, 8]);
    }

    #[test]
    fn mandatory_filter_must_be_registered() {
        let registry = FilterRegistry::new();
        let pipeline = vec![FilterDescription::new(300, vec![1])];
        assert!(matches!(
            registry.encode_pipeline(&pipeline, &[1], 1),
            Err(FormatError::UnregisteredFilter(300))
        ));
        assert!(matches!(
            registry.decode_pipeline(&pipeline, 0, &[1], 1, 1),
            Err(FormatError::UnregisteredFilter(300))
        ));
    }
}
