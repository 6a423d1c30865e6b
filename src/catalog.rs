//! Garment categories and the keyword classifier used for catalog items.

use std::fmt;

use serde::{Deserialize, Serialize};

/// 衣類カテゴリ
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GarmentCategory {
    Shirts,
    Jackets,
    Pants,
    Shorts,
    Dresses,
    /// 靴・アクセサリーなど、採寸要件の定義がないもの
    Other,
}

impl GarmentCategory {
    pub const ALL: [GarmentCategory; 6] = [
        Self::Shirts,
        Self::Jackets,
        Self::Pants,
        Self::Shorts,
        Self::Dresses,
        Self::Other,
    ];

    /// カテゴリIDから変換（大文字小文字は区別しない）
    pub fn from_id(id: &str) -> Self {
        match id.trim().to_lowercase().as_str() {
            "shirts" | "shirt" | "t-shirts" | "tops" | "tees" | "blouses" => Self::Shirts,
            "jackets" | "jacket" | "outerwear" | "coats" | "hoodies" | "sweaters" => Self::Jackets,
            "pants" | "jeans" | "trousers" => Self::Pants,
            "shorts" => Self::Shorts,
            "dresses" | "dress" | "skirts" => Self::Dresses,
            _ => Self::Other,
        }
    }

    pub fn id(&self) -> &'static str {
        match self {
            Self::Shirts => "shirts",
            Self::Jackets => "jackets",
            Self::Pants => "pants",
            Self::Shorts => "shorts",
            Self::Dresses => "dresses",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for GarmentCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Women,
    Men,
    Unisex,
}

/// 商品
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub title: String,
    pub category_id: String,
    /// 在庫のあるサイズ表記。空なら在庫不明
    #[serde(default)]
    pub sizes: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Item {
    /// タイトルとタグからカテゴリを推定して作成
    pub fn from_title(id: impl Into<String>, title: impl Into<String>, tags: Vec<String>) -> Self {
        let title = title.into();
        let class = classify(&title, &tags);
        Self {
            id: id.into(),
            title,
            category_id: class.category.id().to_string(),
            sizes: Vec::new(),
            tags,
        }
    }

    pub fn with_sizes<S: Into<String>>(mut self, sizes: impl IntoIterator<Item = S>) -> Self {
        self.sizes = sizes.into_iter().map(Into::into).collect();
        self
    }

    pub fn category(&self) -> GarmentCategory {
        GarmentCategory::from_id(&self.category_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProductClass {
    pub category: GarmentCategory,
    pub gender: Gender,
}

// 先頭から順に判定、最初の一致を採用
const CATEGORY_KEYWORDS: &[(&str, GarmentCategory)] = &[
    ("t-shirt", GarmentCategory::Shirts),
    ("shirt", GarmentCategory::Shirts),
    ("blouse", GarmentCategory::Shirts),
    ("tee", GarmentCategory::Shirts),
    ("top", GarmentCategory::Shirts),
    ("jacket", GarmentCategory::Jackets),
    ("coat", GarmentCategory::Jackets),
    ("hoodie", GarmentCategory::Jackets),
    ("sweater", GarmentCategory::Jackets),
    ("outerwear", GarmentCategory::Jackets),
    ("shorts", GarmentCategory::Shorts),
    ("jeans", GarmentCategory::Pants),
    ("trouser", GarmentCategory::Pants),
    ("pants", GarmentCategory::Pants),
    ("dress", GarmentCategory::Dresses),
    ("skirt", GarmentCategory::Dresses),
];

const WOMEN_KEYWORDS: &[&str] = &["women", "woman", "ladies", "female"];
const MEN_KEYWORDS: &[&str] = &["men", "man", "male"];

/// タイトルとタグから分類
///
/// Plain substring matching: "women" is checked before "men" because it
/// contains it, and words such as "topaz" still hit "top".
pub fn classify(title: &str, tags: &[String]) -> ProductClass {
    let mut haystack = title.to_lowercase();
    for tag in tags {
        haystack.push(' ');
        haystack.push_str(&tag.to_lowercase());
    }

    let category = CATEGORY_KEYWORDS
        .iter()
        .find(|(kw, _)| haystack.contains(kw))
        .map(|(_, c)| *c)
        .unwrap_or(GarmentCategory::Other);

    let has_any = |kws: &[&str]| kws.iter().any(|kw| haystack.contains(kw));
    let gender = if has_any(WOMEN_KEYWORDS) {
        Gender::Women
    } else if has_any(MEN_KEYWORDS) {
        Gender::Men
    } else {
        // "unisex" タグも無印もここ
        Gender::Unisex
    };

    ProductClass { category, gender }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_aliases() {
        assert_eq!(GarmentCategory::from_id("T-Shirts"), GarmentCategory::Shirts);
        assert_eq!(GarmentCategory::from_id("HOODIES"), GarmentCategory::Jackets);
        assert_eq!(GarmentCategory::from_id("jeans"), GarmentCategory::Pants);
        assert_eq!(GarmentCategory::from_id("skirts"), GarmentCategory::Dresses);
        assert_eq!(GarmentCategory::from_id("shoes"), GarmentCategory::Other);
        for c in GarmentCategory::ALL {
            assert_eq!(GarmentCategory::from_id(c.id()), c);
        }
    }

    #[test]
    fn test_classify_category_first() {
        let class = classify("Slim Fit Denim Jeans", &[]);
        assert_eq!(class.category, GarmentCategory::Pants);
        assert_eq!(class.gender, Gender::Unisex);

        let class = classify("Classic T-Shirt", &["men".to_string()]);
        assert_eq!(class.category, GarmentCategory::Shirts);
        assert_eq!(class.gender, Gender::Men);

        assert_eq!(classify("Running Shorts", &[]).category, GarmentCategory::Shorts);
        assert_eq!(classify("Leather Belt", &[]).category, GarmentCategory::Other);
    }

    #[test]
    fn test_women_checked_before_men() {
        assert_eq!(classify("Women's Summer Dress", &[]).gender, Gender::Women);
        assert_eq!(classify("Men's Rain Jacket", &[]).gender, Gender::Men);
        assert_eq!(classify("Hoodie", &["Unisex".to_string()]).gender, Gender::Unisex);
    }

    #[test]
    fn test_substring_ambiguity_is_kept() {
        // "manhattan" に "man" が含まれる
        assert_eq!(classify("Manhattan Coat", &[]).gender, Gender::Men);
    }

    #[test]
    fn test_item_from_title() {
        let item = Item::from_title("sku-1", "Wool Sweater", vec![]).with_sizes(["S", "M"]);
        assert_eq!(item.category(), GarmentCategory::Jackets);
        assert_eq!(item.sizes, vec!["S".to_string(), "M".to_string()]);
    }
}
