//! Rule-based size recommendation from body measurements.

use std::fmt;
use std::str::FromStr;

use anyhow::bail;
use serde::Serialize;

use crate::catalog::{GarmentCategory, Item};
use crate::measurement::Measurements;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum SizeLabel {
    XS,
    S,
    M,
    L,
    XL,
    XXL,
}

impl SizeLabel {
    pub const ALL: [SizeLabel; 6] = [Self::XS, Self::S, Self::M, Self::L, Self::XL, Self::XXL];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::XS => "XS",
            Self::S => "S",
            Self::M => "M",
            Self::L => "L",
            Self::XL => "XL",
            Self::XXL => "XXL",
        }
    }

    pub fn larger(&self) -> Option<Self> {
        Self::ALL.get(*self as usize + 1).copied()
    }

    pub fn smaller(&self) -> Option<Self> {
        (*self as usize).checked_sub(1).and_then(|i| Self::ALL.get(i).copied())
    }
}

impl fmt::Display for SizeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SizeLabel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_uppercase();
        match Self::ALL.iter().find(|l| l.as_str() == upper) {
            Some(l) => Ok(*l),
            None => bail!("unknown size label: {}", s),
        }
    }
}

/// どの採寸値で決めたか
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeBasis {
    Chest,
    Waist,
    /// 採寸値を使わない既定値
    Default,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SizeRecommendation {
    /// 商品の表記そのまま（在庫からのフォールバック時）
    pub size: String,
    pub confidence: f32,
    pub basis: SizeBasis,
}

const CHEST_CONFIDENCE: f32 = 0.85;
const WAIST_CONFIDENCE: f32 = 0.8;
const DEFAULT_CONFIDENCE: f32 = 0.8;
const NEIGHBOR_FACTOR: f32 = 0.9;
const FALLBACK_FACTOR: f32 = 0.7;

fn chest_label(chest: f32) -> SizeLabel {
    match chest {
        c if c <= 34.0 => SizeLabel::XS,
        c if c <= 36.0 => SizeLabel::S,
        c if c <= 40.0 => SizeLabel::M,
        c if c <= 44.0 => SizeLabel::L,
        c if c <= 48.0 => SizeLabel::XL,
        _ => SizeLabel::XXL,
    }
}

fn waist_label(waist: f32) -> SizeLabel {
    match waist {
        w if w <= 27.0 => SizeLabel::XS,
        w if w <= 30.0 => SizeLabel::S,
        w if w <= 33.0 => SizeLabel::M,
        w if w <= 36.0 => SizeLabel::L,
        w if w <= 39.0 => SizeLabel::XL,
        _ => SizeLabel::XXL,
    }
}

/// 採寸値から基本サイズを決める（在庫は考慮しない）
pub fn base_size(category: GarmentCategory, m: &Measurements) -> (SizeLabel, f32, SizeBasis) {
    match category {
        GarmentCategory::Shirts | GarmentCategory::Jackets | GarmentCategory::Dresses => {
            (chest_label(m.chest), CHEST_CONFIDENCE, SizeBasis::Chest)
        }
        GarmentCategory::Pants | GarmentCategory::Shorts => {
            (waist_label(m.waist), WAIST_CONFIDENCE, SizeBasis::Waist)
        }
        GarmentCategory::Other => (SizeLabel::M, DEFAULT_CONFIDENCE, SizeBasis::Default),
    }
}

fn find_available<'a>(sizes: &'a [String], label: SizeLabel) -> Option<&'a String> {
    sizes.iter().find(|s| s.trim().eq_ignore_ascii_case(label.as_str()))
}

/// 商品に対するサイズ推薦
///
/// An item without any listed sizes has unknown availability, so the base
/// label is returned as is.
pub fn recommend(item: &Item, measurements: &Measurements) -> SizeRecommendation {
    let (label, confidence, basis) = base_size(item.category(), measurements);

    if item.sizes.is_empty() {
        return SizeRecommendation {
            size: label.to_string(),
            confidence,
            basis,
        };
    }

    if let Some(size) = find_available(&item.sizes, label) {
        return SizeRecommendation {
            size: size.clone(),
            confidence,
            basis,
        };
    }

    // ひとつ大きい方を優先
    let neighbor = [label.larger(), label.smaller()]
        .into_iter()
        .flatten()
        .find_map(|l| find_available(&item.sizes, l));
    if let Some(size) = neighbor {
        return SizeRecommendation {
            size: size.clone(),
            confidence: confidence * NEIGHBOR_FACTOR,
            basis,
        };
    }

    SizeRecommendation {
        size: item.sizes[0].clone(),
        confidence: confidence * FALLBACK_FACTOR,
        basis,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::PlaceholderMeasurements;

    fn item(category: &str, sizes: &[&str]) -> Item {
        Item {
            id: "sku".to_string(),
            title: "test".to_string(),
            category_id: category.to_string(),
            sizes: sizes.iter().map(|s| s.to_string()).collect(),
            tags: Vec::new(),
        }
    }

    fn with_chest(chest: f32) -> Measurements {
        Measurements {
            chest,
            ..PlaceholderMeasurements::VALUES
        }
    }

    fn approx_eq(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-5
    }

    #[test]
    fn test_chest_boundaries() {
        assert_eq!(chest_label(34.0), SizeLabel::XS);
        assert_eq!(chest_label(34.5), SizeLabel::S);
        assert_eq!(chest_label(40.0), SizeLabel::M);
        assert_eq!(chest_label(41.0), SizeLabel::L);
        assert_eq!(chest_label(48.0), SizeLabel::XL);
        assert_eq!(chest_label(48.1), SizeLabel::XXL);
    }

    #[test]
    fn test_waist_boundaries() {
        assert_eq!(waist_label(27.0), SizeLabel::XS);
        assert_eq!(waist_label(30.0), SizeLabel::S);
        assert_eq!(waist_label(32.0), SizeLabel::M);
        assert_eq!(waist_label(36.0), SizeLabel::L);
        assert_eq!(waist_label(39.5), SizeLabel::XXL);
    }

    #[test]
    fn test_shirt_by_chest() {
        let rec = recommend(&item("shirts", &[]), &with_chest(41.0));
        assert_eq!(rec.size, "L");
        assert!(approx_eq(rec.confidence, 0.85));
        assert_eq!(rec.basis, SizeBasis::Chest);
    }

    #[test]
    fn test_pants_by_waist() {
        let rec = recommend(&item("jeans", &["S", "M", "L"]), &PlaceholderMeasurements::VALUES);
        assert_eq!(rec.size, "M");
        assert!(approx_eq(rec.confidence, 0.8));
    }

    #[test]
    fn test_other_category_default() {
        let rec = recommend(&item("shoes", &[]), &with_chest(50.0));
        assert_eq!(rec.size, "M");
        assert_eq!(rec.basis, SizeBasis::Default);
    }

    #[test]
    fn test_prefers_larger_neighbor() {
        let rec = recommend(&item("shirts", &["M", "XL"]), &with_chest(41.0));
        assert_eq!(rec.size, "XL");
        assert!(approx_eq(rec.confidence, 0.85 * 0.9));

        let rec = recommend(&item("shirts", &["m"]), &with_chest(41.0));
        assert_eq!(rec.size, "m");
        assert!(approx_eq(rec.confidence, 0.765));
    }

    #[test]
    fn test_falls_back_to_first_available() {
        let rec = recommend(&item("shirts", &["S"]), &with_chest(41.0));
        assert_eq!(rec.size, "S");
        assert!(approx_eq(rec.confidence, 0.595));
    }

    #[test]
    fn test_label_parse_and_neighbors() {
        assert_eq!("xl".parse::<SizeLabel>().unwrap(), SizeLabel::XL);
        assert!("XXXL".parse::<SizeLabel>().is_err());
        assert_eq!(SizeLabel::XXL.larger(), None);
        assert_eq!(SizeLabel::XS.smaller(), None);
        assert_eq!(SizeLabel::M.larger(), Some(SizeLabel::L));
    }
}
