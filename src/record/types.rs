use crate::record::Record;
use serde::{Deserialize, Serialize};

/// A materia medica entry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Medicine {
    pub name: String,
    #[serde(default)]
    pub pinyin: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    /// Nature and flavour
    #[serde(default)]
    pub nature: Option<String>,
    #[serde(default)]
    pub efficacy: Option<String>,
    #[serde(default)]
    pub indications: Option<String>,
    #[serde(default)]
    pub usage: Option<String>,
    #[serde(default)]
    pub cautions: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Record for Medicine {
    const KIND: &'static str = "medicine";
    const SCHEMA_VERSION: u32 = 1;
    const FIELDS: &'static [&'static str] = &[
        "pinyin",
        "category",
        "nature",
        "efficacy",
        "indications",
        "usage",
        "cautions",
    ];

    fn natural_key(&self) -> &str {
        &self.name
    }

    fn field_values(&self) -> Vec<Option<String>> {
        vec![
            self.pinyin.clone(),
            self.category.clone(),
            self.nature.clone(),
            self.efficacy.clone(),
            self.indications.clone(),
            self.usage.clone(),
            self.cautions.clone(),
        ]
    }

    fn tags(&self) -> &[String] {
        &self.tags
    }

    // Bucket by transliteration when the source provides one
    fn sort_source(&self) -> &str {
        match self.pinyin.as_deref() {
            Some(pinyin) if !pinyin.trim().is_empty() => pinyin,
            _ => &self.name,
        }
    }
}

/// A published article
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub title: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub published: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Record for Article {
    const KIND: &'static str = "article";
    const SCHEMA_VERSION: u32 = 1;
    const FIELDS: &'static [&'static str] = &["author", "published", "summary", "body", "url"];

    fn natural_key(&self) -> &str {
        &self.title
    }

    fn field_values(&self) -> Vec<Option<String>> {
        vec![
            self.author.clone(),
            self.published.clone(),
            self.summary.clone(),
            self.body.clone(),
            self.url.clone(),
        ]
    }

    fn tags(&self) -> &[String] {
        &self.tags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_medicine_sort_source_prefers_pinyin() {
        let mut record = Medicine {
            name: "阿胶".to_string(),
            ..Medicine::default()
        };
        assert_eq!(record.sort_source(), "阿胶");

        record.pinyin = Some("ē jiāo".to_string());
        assert_eq!(record.sort_source(), "ē jiāo");

        record.pinyin = Some("  ".to_string());
        assert_eq!(record.sort_source(), "阿胶");
    }

    #[test]
    fn test_deserialize_with_missing_optionals() {
        let record: Medicine = serde_json::from_str(r#"{"name": "当归"}"#).unwrap();
        assert_eq!(record.name, "当归");
        assert!(record.tags.is_empty());
        assert!(record.efficacy.is_none());
    }
}
