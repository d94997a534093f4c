use std::path::Path;

use crate::model::ModelError;

/// PlantVillage classes in the order of the classifier's output layer.
pub const PLANT_VILLAGE_CLASSES: [&str; 38] = [
    "Apple___Apple_scab",
    "Apple___Black_rot",
    "Apple___Cedar_apple_rust",
    "Apple___healthy",
    "Blueberry___healthy",
    "Cherry_(including_sour)___Powdery_mildew",
    "Cherry_(including_sour)___healthy",
    "Corn_(maize)___Cercospora_leaf_spot Gray_leaf_spot",
    "Corn_(maize)___Common_rust_",
    "Corn_(maize)___Northern_Leaf_Blight",
    "Corn_(maize)___healthy",
    "Grape___Black_rot",
    "Grape___Esca_(Black_Measles)",
    "Grape___Leaf_blight_(Isariopsis_Leaf_Spot)",
    "Grape___healthy",
    "Orange___Haunglongbing_(Citrus_greening)",
    "Peach___Bacterial_spot",
    "Peach___healthy",
    "Pepper,_bell___Bacterial_spot",
    "Pepper,_bell___healthy",
    "Potato___Early_blight",
    "Potato___Late_blight",
    "Potato___healthy",
    "Raspberry___healthy",
    "Soybean___healthy",
    "Squash___Powdery_mildew",
    "Strawberry___Leaf_scorch",
    "Strawberry___healthy",
    "Tomato___Bacterial_spot",
    "Tomato___Early_blight",
    "Tomato___Late_blight",
    "Tomato___Leaf_Mold",
    "Tomato___Septoria_leaf_spot",
    "Tomato___Spider_mites Two-spotted_spider_mite",
    "Tomato___Target_Spot",
    "Tomato___Tomato_Yellow_Leaf_Curl_Virus",
    "Tomato___Tomato_mosaic_virus",
    "Tomato___healthy",
];

/// Index-to-label mapping for the classifier's output vector.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelTable {
    labels: Vec<String>,
}

impl Default for LabelTable {
    fn default() -> Self {
        Self {
            labels: PLANT_VILLAGE_CLASSES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl LabelTable {
    pub fn new(labels: Vec<String>) -> Self {
        Self { labels }
    }

    /// Reads one label per line, skipping blank lines.
    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let table = Self::new(
            std::fs::read_to_string(path)?
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(String::from)
                .collect(),
        );

        if table.is_empty() {
            return Err(ModelError::Labels(format!(
                "{} contains no labels",
                path.display()
            )));
        }
        Ok(table)
    }

    /// Uses the built-in table when no override is given or it cannot be read.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };
        match Self::load(path) {
            Ok(table) => table,
            Err(err) => {
                tracing::error!(
                    "Could not load class list {}: {}. Using built-in labels",
                    path.display(),
                    err
                );
                Self::default()
            }
        }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }
}

/// `Apple___Apple_scab` -> `Apple: Apple scab`
pub fn display_name(label: &str) -> String {
    label.replace("___", ": ").replace('_', " ")
}

/// `Apple___Apple_scab` -> `Apple Apple scab`
pub fn prompt_name(label: &str) -> String {
    label.replace("___", " ").replace('_', " ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table_has_one_entry_per_output_unit() {
        let table = LabelTable::default();
        assert_eq!(table.len(), 38);
        assert_eq!(table.get(0), Some("Apple___Apple_scab"));
        assert_eq!(table.get(37), Some("Tomato___healthy"));
        assert_eq!(table.get(38), None);
    }

    #[test]
    fn display_name_substitutes_separators() {
        assert_eq!(display_name("Apple___Apple_scab"), "Apple: Apple scab");
        assert_eq!(display_name("Corn_(maize)___Common_rust_"), "Corn (maize): Common rust ");
        assert_eq!(
            display_name("Pepper,_bell___Bacterial_spot"),
            "Pepper, bell: Bacterial spot"
        );
    }

    #[test]
    fn prompt_name_uses_plain_spaces() {
        assert_eq!(prompt_name("Apple___Apple_scab"), "Apple Apple scab");
        assert_eq!(prompt_name("Tomato___healthy"), "Tomato healthy");
    }

    #[test]
    fn load_skips_blank_lines() {
        let path = std::env::temp_dir().join(format!("labels-{}.txt", uuid::Uuid::new_v4()));
        std::fs::write(&path, "healthy\n\nrust\n  \nblight\n").unwrap();

        let table = LabelTable::load(&path).unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.get(1), Some("rust"));

        std::fs::write(&path, "\n\n").unwrap();
        assert!(matches!(LabelTable::load(&path), Err(ModelError::Labels(_))));

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn unreadable_override_falls_back_to_built_in_table() {
        assert_eq!(LabelTable::load_or_default(None), LabelTable::default());

        let missing = std::env::temp_dir().join(format!("labels-{}.txt", uuid::Uuid::new_v4()));
        assert_eq!(LabelTable::load_or_default(Some(&missing)), LabelTable::default());

        let empty = std::env::temp_dir().join(format!("labels-{}.txt", uuid::Uuid::new_v4()));
        std::fs::write(&empty, "\n").unwrap();
        assert_eq!(LabelTable::load_or_default(Some(&empty)).len(), 38);
        std::fs::remove_file(&empty).unwrap();
    }
}
