// src/decoder.rs

use crate::analysis::{Block, BlockType};
use crate::catalog::{FieldAlias, QueryCatalog};
use crate::error::PipelineError;
use std::collections::BTreeMap;
use tracing::warn;

/// Extracted answers for one bill, keyed by field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldMap {
    fields: BTreeMap<FieldAlias, String>,
}

impl FieldMap {
    pub fn get(&self, alias: FieldAlias) -> Option<&str> {
        self.fields.get(&alias).map(String::as_str)
    }

    pub fn insert(&mut self, alias: FieldAlias, value: String) -> Option<String> {
        self.fields.insert(alias, value)
    }

    pub fn contains(&self, alias: FieldAlias) -> bool {
        self.fields.contains_key(&alias)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (FieldAlias, &str)> {
        self.fields.iter().map(|(k, v)| (*k, v.as_str()))
    }
}

impl FromIterator<(FieldAlias, String)> for FieldMap {
    fn from_iter<I: IntoIterator<Item = (FieldAlias, String)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

/// Rebuilds a [`FieldMap`] from a completed job's block stream.
pub struct ResultDecoder<'a> {
    catalog: &'a QueryCatalog,
}

impl<'a> ResultDecoder<'a> {
    pub fn new(catalog: &'a QueryCatalog) -> Self {
        Self { catalog }
    }

    /// Pair each query block with the result block that follows it.
    ///
    /// Unrelated block types are filtered out before pairing; the service
    /// interleaves them freely. Within the filtered sequence every query must
    /// be followed by exactly one result.
    pub fn decode(&self, blocks: &[Block]) -> Result<FieldMap, PipelineError> {
        let relevant: Vec<&Block> = blocks
            .iter()
            .filter(|b| matches!(b.block_type, BlockType::Query | BlockType::QueryResult))
            .collect();

        if relevant.len() % 2 != 0 {
            return Err(PipelineError::MalformedResult(format!(
                "{} query/result blocks, expected an even count",
                relevant.len()
            )));
        }

        let mut map = FieldMap::default();
        for (i, pair) in relevant.chunks_exact(2).enumerate() {
            let (query, answer) = (pair[0], pair[1]);
            if query.block_type != BlockType::Query || answer.block_type != BlockType::QueryResult
            {
                return Err(PipelineError::MalformedResult(format!(
                    "pair {i} is {:?} followed by {:?}",
                    query.block_type, answer.block_type
                )));
            }

            let wire_alias = query
                .query
                .as_ref()
                .and_then(|q| q.alias.as_deref())
                .ok_or_else(|| {
                    PipelineError::MalformedResult(format!("query block in pair {i} has no alias"))
                })?;

            let Some(alias) = FieldAlias::parse(wire_alias).filter(|a| self.catalog.contains(*a))
            else {
                warn!(alias = %wire_alias, "Skipping answer for alias outside the catalog");
                continue;
            };

            let text = answer.text.clone().unwrap_or_default();
            if map.contains(alias) {
                warn!(alias = %alias, ignored = %text, "Repeated alias, keeping first answer");
                continue;
            }
            map.insert(alias, text);
        }

        Ok(map)
    }
}
