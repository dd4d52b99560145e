//! Reference mapping between versification traditions.
//!
//! The Hebrew-numbered systems (KJV and its relatives) and the Greek/Latin
//! ones (Vulgate, LXX) differ mainly in the Psalter and in Daniel 3-4. Every
//! other book keeps its numbering, unless the target tradition does not carry
//! the book at all.

use std::fmt;

use serde::Serialize;

use scriptorium_shared::VerseAddress;

use crate::aliases::{canonical_book_id, normalize_system_name};

/// How a reference moved between systems.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingType {
    /// Same book, chapter and verse.
    Direct,
    /// Same content under a different number.
    Renumber,
    /// The source unit is divided across several target units.
    Split,
    /// Several source units share one target unit.
    Merge,
    /// The target system has no counterpart.
    Missing,
}

impl MappingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Renumber => "renumber",
            Self::Split => "split",
            Self::Merge => "merge",
            Self::Missing => "missing",
        }
    }
}

impl fmt::Display for MappingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of [`map_reference`]. `address` is `None` exactly when the kind is
/// [`MappingType::Missing`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MappedVerse {
    pub address: Option<VerseAddress>,
    pub kind: MappingType,
}

impl MappedVerse {
    fn to(book: &str, chapter: u32, verse: u32, kind: MappingType) -> Self {
        Self {
            address: Some(VerseAddress::new(book, chapter, verse)),
            kind,
        }
    }

    fn missing() -> Self {
        Self {
            address: None,
            kind: MappingType::Missing,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tradition {
    Hebrew,
    Greek,
}

fn tradition(system: &str) -> Option<Tradition> {
    match normalize_system_name(system) {
        "KJV" | "KJVA" | "NRSV" | "NRSVA" | "MT" | "Leningrad" | "Luther" => Some(Tradition::Hebrew),
        "Vulg" | "LXX" => Some(Tradition::Greek),
        _ => None,
    }
}

/// Books a Greek/Latin canon carries that the named Hebrew-numbered system
/// lacks.
fn absent_from(system: &str, book: &str) -> bool {
    const NEVER: [&str; 6] = ["3Macc", "4Macc", "Odes", "PssSol", "AddPs", "EpLao"];
    const APOCRYPHA: [&str; 10] = [
        "Tob", "Jdt", "Wis", "Sir", "Bar", "1Macc", "2Macc", "PrMan", "1Esd", "2Esd",
    ];
    if NEVER.contains(&book) {
        return true;
    }
    match normalize_system_name(system) {
        "KJV" | "NRSV" | "MT" | "Leningrad" => APOCRYPHA.contains(&book),
        _ => false,
    }
}

/// Map `address` from the `from` system to the `to` system.
///
/// System names go through the usual aliases (`Vulgate` → `Vulg`). Pairs
/// outside the built-in rule set, and identical systems, map directly.
pub fn map_reference(from: &str, to: &str, address: &VerseAddress) -> MappedVerse {
    let book = canonical_book_id(&address.book).unwrap_or(address.book.as_str());
    let (chapter, verse) = (address.chapter, address.verse);
    let direct = || MappedVerse::to(book, chapter, verse, MappingType::Direct);

    if normalize_system_name(from) == normalize_system_name(to) {
        return direct();
    }
    match (tradition(from), tradition(to)) {
        (Some(Tradition::Hebrew), Some(Tradition::Greek)) => match book {
            "Ps" => psalm_to_greek(chapter, verse),
            "Dan" => daniel_to_greek(chapter, verse),
            _ => direct(),
        },
        (Some(Tradition::Greek), Some(Tradition::Hebrew)) => {
            if absent_from(to, book) {
                return MappedVerse::missing();
            }
            match book {
                "Ps" => psalm_to_hebrew(chapter, verse),
                "Dan" => daniel_to_hebrew(chapter, verse),
                _ => direct(),
            }
        }
        _ => direct(),
    }
}

// ---------------------------------------------------------------------------
// Psalms
// ---------------------------------------------------------------------------
//
// Hebrew 1-8    = Greek 1-8
// Hebrew 9-10   = Greek 9 (10 continues at 9:22)
// Hebrew 11-113 = Greek 10-112
// Hebrew 114-115 = Greek 113 (115 continues at 113:9)
// Hebrew 116    = Greek 114 (1-9) + 115 (10-19)
// Hebrew 117-146 = Greek 116-145
// Hebrew 147    = Greek 146 (1-11) + 147 (12-20)
// Hebrew 148-150 = Greek 148-150

fn psalm_to_greek(ps: u32, v: u32) -> MappedVerse {
    use MappingType::*;
    match ps {
        10 => MappedVerse::to("Ps", 9, v + 21, Merge),
        11..=113 | 117..=146 => MappedVerse::to("Ps", ps - 1, v, Renumber),
        114 => MappedVerse::to("Ps", 113, v, Merge),
        115 => MappedVerse::to("Ps", 113, v + 8, Merge),
        116 if v <= 9 => MappedVerse::to("Ps", 114, v, Split),
        116 => MappedVerse::to("Ps", 115, v - 9, Split),
        147 if v <= 11 => MappedVerse::to("Ps", 146, v, Split),
        147 => MappedVerse::to("Ps", 147, v - 11, Split),
        _ => MappedVerse::to("Ps", ps, v, Direct),
    }
}

fn psalm_to_hebrew(ps: u32, v: u32) -> MappedVerse {
    use MappingType::*;
    match ps {
        9 if v > 21 => MappedVerse::to("Ps", 10, v - 21, Split),
        10..=112 | 116..=145 => MappedVerse::to("Ps", ps + 1, v, Renumber),
        113 if v <= 8 => MappedVerse::to("Ps", 114, v, Split),
        113 => MappedVerse::to("Ps", 115, v - 8, Split),
        114 => MappedVerse::to("Ps", 116, v, Merge),
        115 => MappedVerse::to("Ps", 116, v + 9, Merge),
        146 => MappedVerse::to("Ps", 147, v, Merge),
        147 => MappedVerse::to("Ps", 147, v + 11, Merge),
        _ => MappedVerse::to("Ps", ps, v, Direct),
    }
}

// ---------------------------------------------------------------------------
// Daniel
// ---------------------------------------------------------------------------
//
// Greek 3:24-90 is the Song of the Three, absent from the Hebrew text.
// Hebrew 3:24-30 = Greek 3:91-97
// Hebrew 4:1-3   = Greek 3:98-100
// Hebrew 4:4-37  = Greek 4:1-34
// Greek 13 (Susanna) and 14 (Bel) have no Hebrew chapter.

fn daniel_to_greek(ch: u32, v: u32) -> MappedVerse {
    use MappingType::*;
    match (ch, v) {
        (3, 24..) => MappedVerse::to("Dan", 3, v + 67, Renumber),
        (4, 1..=3) => MappedVerse::to("Dan", 3, v + 97, Renumber),
        (4, _) => MappedVerse::to("Dan", 4, v - 3, Renumber),
        _ => MappedVerse::to("Dan", ch, v, Direct),
    }
}

fn daniel_to_hebrew(ch: u32, v: u32) -> MappedVerse {
    use MappingType::*;
    match (ch, v) {
        (3, 24..=90) | (13.., _) => MappedVerse::missing(),
        (3, 91..=97) => MappedVerse::to("Dan", 3, v - 67, Renumber),
        (3, 98..) => MappedVerse::to("Dan", 4, v - 97, Renumber),
        (4, _) => MappedVerse::to("Dan", 4, v + 3, Renumber),
        _ => MappedVerse::to("Dan", ch, v, Direct),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Registry;

    fn map(from: &str, to: &str, book: &str, ch: u32, v: u32) -> MappedVerse {
        map_reference(from, to, &VerseAddress::new(book, ch, v))
    }

    fn at(book: &str, ch: u32, v: u32, kind: MappingType) -> MappedVerse {
        MappedVerse::to(book, ch, v, kind)
    }

    #[test]
    fn same_system_is_direct() {
        assert_eq!(map("KJV", "kjv", "Ps", 23, 1), at("Ps", 23, 1, MappingType::Direct));
        assert_eq!(map("Vulgate", "Vulg", "Dan", 3, 50), at("Dan", 3, 50, MappingType::Direct));
    }

    #[test]
    fn psalms_from_kjv_to_vulgate() {
        use MappingType::*;
        let cases = [
            ((8, 9), at("Ps", 8, 9, Direct)),
            ((9, 20), at("Ps", 9, 20, Direct)),
            ((10, 1), at("Ps", 9, 22, Merge)),
            ((23, 1), at("Ps", 22, 1, Renumber)),
            ((51, 3), at("Ps", 50, 3, Renumber)),
            ((114, 8), at("Ps", 113, 8, Merge)),
            ((115, 1), at("Ps", 113, 9, Merge)),
            ((116, 9), at("Ps", 114, 9, Split)),
            ((116, 10), at("Ps", 115, 1, Split)),
            ((119, 176), at("Ps", 118, 176, Renumber)),
            ((147, 11), at("Ps", 146, 11, Split)),
            ((147, 12), at("Ps", 147, 1, Split)),
            ((150, 6), at("Ps", 150, 6, Direct)),
        ];
        for ((ch, v), expected) in cases {
            assert_eq!(map("KJV", "Vulg", "Ps", ch, v), expected, "Ps {ch}:{v}");
        }
    }

    #[test]
    fn psalms_from_vulgate_to_kjv() {
        use MappingType::*;
        assert_eq!(map("Vulg", "KJV", "Ps", 9, 21), at("Ps", 9, 21, Direct));
        assert_eq!(map("Vulg", "KJV", "Ps", 9, 22), at("Ps", 10, 1, Split));
        assert_eq!(map("Vulg", "KJV", "Ps", 22, 1), at("Ps", 23, 1, Renumber));
        assert_eq!(map("Vulg", "KJV", "Ps", 113, 9), at("Ps", 115, 1, Split));
        assert_eq!(map("Vulg", "KJV", "Ps", 115, 1), at("Ps", 116, 10, Merge));
        assert_eq!(map("Vulg", "KJV", "Ps", 147, 1), at("Ps", 147, 12, Merge));
    }

    #[test]
    fn daniel_follows_the_song_of_the_three() {
        use MappingType::*;
        assert_eq!(map("KJV", "Vulg", "Dan", 3, 23), at("Dan", 3, 23, Direct));
        assert_eq!(map("KJV", "Vulg", "Dan", 3, 24), at("Dan", 3, 91, Renumber));
        assert_eq!(map("KJV", "Vulg", "Dan", 4, 3), at("Dan", 3, 100, Renumber));
        assert_eq!(map("KJV", "Vulg", "Dan", 4, 37), at("Dan", 4, 34, Renumber));
        assert_eq!(map("KJV", "Vulg", "Dan", 5, 1), at("Dan", 5, 1, Direct));

        assert_eq!(map("Vulg", "KJV", "Dan", 3, 50), MappedVerse::missing());
        assert_eq!(map("Vulg", "KJV", "Dan", 3, 97), at("Dan", 3, 30, Renumber));
        assert_eq!(map("Vulg", "KJV", "Dan", 3, 98), at("Dan", 4, 1, Renumber));
        assert_eq!(map("Vulg", "KJV", "Dan", 13, 1), MappedVerse::missing());
    }

    #[test]
    fn books_outside_the_target_canon_are_missing() {
        for book in ["Tob", "Sir", "1Macc", "PrMan", "AddPs"] {
            assert_eq!(map("Vulg", "KJV", book, 1, 1).kind, MappingType::Missing, "{book}");
        }
        assert_eq!(map("Vulg", "KJVA", "Tob", 1, 1), at("Tob", 1, 1, MappingType::Direct));
        assert_eq!(map("Vulg", "KJVA", "AddPs", 1, 1).kind, MappingType::Missing);
        assert_eq!(map("KJV", "Vulg", "Matt", 5, 1), at("Matt", 5, 1, MappingType::Direct));
    }

    #[test]
    fn mapped_addresses_exist_in_the_target_system() {
        let registry = Registry::builtin().unwrap();
        let kjv = registry.get("KJV").unwrap();
        let vulg = registry.get("Vulg").unwrap();
        for book in ["Ps", "Dan"] {
            for address in kjv.addresses().filter(|a| a.book == book) {
                let mapped = map_reference("KJV", "Vulg", &address);
                let target = mapped.address.unwrap();
                assert!(vulg.index_for_address(&target).is_ok(), "{address} -> {target}");

                let back = map_reference("Vulg", "KJV", &target);
                assert_eq!(back.address.as_ref(), Some(&address), "{address} round trip");
            }
        }
    }

    #[test]
    fn unrelated_systems_pass_through() {
        assert_eq!(map("KJV", "Synodal", "Ps", 23, 1), at("Ps", 23, 1, MappingType::Direct));
        assert_eq!(map("psalm", "KJV", "psalm", 1, 1).address.unwrap().book, "Ps");
    }
}
