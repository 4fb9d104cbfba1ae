// src/categorize/taxonomy.rs
//! Labels the categorizer may assign: transaction types, coarse groups and categories.

use serde::{Deserialize, Serialize};

use crate::model::TxType;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
    pub description: String,
}

impl Label {
    fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Taxonomy {
    pub types: Vec<TxType>,
    pub groups: Vec<Label>,
    pub categories: Vec<Label>,
    /// Extra categories offered for manual entries only.
    pub extra_categories: Vec<String>,
}

impl Default for Taxonomy {
    fn default() -> Self {
        let groups = vec![
            Label::new(
                "Necessary Expenses",
                "Expenses required to maintain a basic standard of living.",
            ),
            Label::new(
                "Expenses",
                "Expenses that are not required to maintain a basic standard of living.",
            ),
            Label::new(
                "Earnings",
                "Money earned from a job or any other source that is positive.",
            ),
        ];
        let categories = vec![
            Label::new("Income", "Money earned from a job, or any other positive source"),
            Label::new(
                "Housing",
                "Rent, mortgage, utilities, home insurance, internet, mobile bill",
            ),
            Label::new(
                "Transportation",
                "Fuel, car maintenance, public transportation",
            ),
            Label::new("Subscriptions", "Recurring services like streaming or music"),
            Label::new("Groceries", "Supermarkets and food for the household"),
            Label::new("Entertainment", "Movies, concerts, events"),
            Label::new("Dining", "Restaurants, cafes, take-away"),
            Label::new("Travel", "Hotels, flights, rental cars"),
            Label::new("Healthcare", "Healthcare, gym, yoga"),
            Label::new("Shopping", "Clothes, shoes, general retail"),
        ];
        let extra_categories = [
            "Savings",
            "Investments",
            "Loans",
            "Gifts",
            "Taxes",
            "Insurance",
            "Other",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        Self {
            types: vec![TxType::Earning, TxType::Expense],
            groups,
            categories,
            extra_categories,
        }
    }
}

impl Taxonomy {
    /// Every category name, categorizer ones first.
    pub fn all_categories(&self) -> impl Iterator<Item = &str> {
        self.categories
            .iter()
            .map(|c| c.name.as_str())
            .chain(self.extra_categories.iter().map(String::as_str))
    }

    pub fn is_known_category(&self, name: &str) -> bool {
        self.all_categories().any(|c| c.eq_ignore_ascii_case(name))
    }

    pub fn is_known_group(&self, name: &str) -> bool {
        self.groups.iter().any(|g| g.name.eq_ignore_ascii_case(name))
    }

    /// Prompt section listing categories and groups, one `name: description` per line.
    pub fn render(&self) -> String {
        let cats = self
            .categories
            .iter()
            .map(|c| format!("{}: {}", c.name, c.description))
            .collect::<Vec<_>>()
            .join("\n");
        let groups = self
            .groups
            .iter()
            .map(|g| format!("{}: {}", g.name, g.description))
            .collect::<Vec<_>>()
            .join("\n");
        let types = self
            .types
            .iter()
            .map(|t| t.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        format!("### Types: {types}\n\n### Categories:\n{cats}\n\n### Groups:\n{groups}")
    }
}
