// src/catalog.rs

use std::fmt;

/// The fixed set of fields we ask the analysis service to extract.
///
/// The wire names are what the service echoes back in its query blocks, so
/// renaming one changes the output schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FieldAlias {
    CustomerName,
    CustomerAddress,
    MeterId,
    KwhUsage,
    BillDate,
    UtilityProviderName,
    UtilityProviderAddress,
}

/// How a field is normalized after decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Date,
    Address,
    Text,
}

impl FieldAlias {
    pub const ALL: [FieldAlias; 7] = [
        FieldAlias::CustomerName,
        FieldAlias::CustomerAddress,
        FieldAlias::MeterId,
        FieldAlias::KwhUsage,
        FieldAlias::BillDate,
        FieldAlias::UtilityProviderName,
        FieldAlias::UtilityProviderAddress,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FieldAlias::CustomerName => "Customer_Name",
            FieldAlias::CustomerAddress => "Customer_Address",
            FieldAlias::MeterId => "ES_ID",
            FieldAlias::KwhUsage => "kWh_Usage",
            FieldAlias::BillDate => "Bill_Date",
            FieldAlias::UtilityProviderName => "Utility_Provider_Name",
            FieldAlias::UtilityProviderAddress => "Utility_Provider_Address",
        }
    }

    pub fn parse(wire: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.as_str() == wire)
    }

    pub fn kind(self) -> FieldKind {
        match self {
            FieldAlias::BillDate => FieldKind::Date,
            FieldAlias::CustomerAddress => FieldKind::Address,
            FieldAlias::CustomerName
            | FieldAlias::MeterId
            | FieldAlias::KwhUsage
            | FieldAlias::UtilityProviderName
            | FieldAlias::UtilityProviderAddress => FieldKind::Text,
        }
    }
}

impl fmt::Display for FieldAlias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub question: String,
    pub alias: FieldAlias,
}

/// Ordered list of questions sent with every analysis request.
#[derive(Debug, Clone)]
pub struct QueryCatalog {
    entries: Vec<Query>,
}

impl QueryCatalog {
    pub fn new(entries: Vec<Query>) -> Result<Self, String> {
        for (i, entry) in entries.iter().enumerate() {
            if entries[..i].iter().any(|e| e.alias == entry.alias) {
                return Err(format!("duplicate alias {} in query catalog", entry.alias));
            }
        }
        Ok(Self { entries })
    }

    /// The questions asked of every utility bill.
    pub fn utility_bill() -> Self {
        let q = |question: &str, alias| Query {
            question: question.to_string(),
            alias,
        };
        Self {
            entries: vec![
                q("What is this customer's name?", FieldAlias::CustomerName),
                q("What is this customer's address?", FieldAlias::CustomerAddress),
                q("What is the meter ID?", FieldAlias::MeterId),
                q("How many kWhs were used?", FieldAlias::KwhUsage),
                q("What is the statement date?", FieldAlias::BillDate),
                q("What's the name at the top of the bill?", FieldAlias::UtilityProviderName),
                q(
                    "What's the address at the top of the bill?",
                    FieldAlias::UtilityProviderAddress,
                ),
            ],
        }
    }

    pub fn entries(&self) -> &[Query] {
        &self.entries
    }

    pub fn contains(&self, alias: FieldAlias) -> bool {
        self.entries.iter().any(|e| e.alias == alias)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
