use arrow::array::{BooleanArray, StringArray};

/// Result-name fragments that mark an indicator as counting people directly.
pub const DEFAULT_KEYWORDS: [&str; 13] = [
    "people",
    "children",
    "students",
    "farmers",
    "patients",
    "trained",
    "beneficiaries",
    "households",
    "teachers",
    "individuals",
    "recipients",
    "community",
    "participants",
];

/// Keyword heuristic for human-impact indicators.
///
/// Matching is a case-insensitive substring test against the result name,
/// so "Number of Trained Farmers" matches both `trained` and `farmers`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classifier {
    keywords: Vec<String>,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(DEFAULT_KEYWORDS)
    }
}

impl Classifier {
    /// Keywords are lowercased; blank ones are dropped since they would match every name.
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut kws: Vec<String> = Vec::new();
        for kw in keywords {
            let kw = kw.as_ref().trim().to_lowercase();
            if !kw.is_empty() && !kws.contains(&kw) {
                kws.push(kw);
            }
        }
        Self { keywords: kws }
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    /// Missing or empty text never matches.
    pub fn classify(&self, result_name: Option<&str>) -> bool {
        match result_name {
            Some(text) if !text.is_empty() => {
                let lower = text.to_lowercase();
                self.keywords.iter().any(|kw| lower.contains(kw.as_str()))
            }
            _ => false,
        }
    }

    /// Classify a whole `result_name` column; the output has no nulls.
    pub fn annotate(&self, names: &StringArray) -> BooleanArray {
        names
            .iter()
            .map(|name| Some(self.classify(name)))
            .collect()
    }
}

/// Classify with the default keyword set.
pub fn classify(result_name: &str) -> bool {
    Classifier::default().classify(Some(result_name))
}
