//! Common names for books and versification systems.

/// Map a full or informal book name to its OSIS id.
pub fn canonical_book_id(name: &str) -> Option<&'static str> {
    let lowered = name.trim().to_ascii_lowercase();
    let id = match lowered.as_str() {
        "genesis" => "Gen",
        "exodus" => "Exod",
        "leviticus" => "Lev",
        "numbers" => "Num",
        "deuteronomy" => "Deut",
        "joshua" => "Josh",
        "judges" => "Judg",
        "1 samuel" => "1Sam",
        "2 samuel" => "2Sam",
        "1 kings" => "1Kgs",
        "2 kings" => "2Kgs",
        "1 chronicles" => "1Chr",
        "2 chronicles" => "2Chr",
        "nehemiah" => "Neh",
        "esther" => "Esth",
        "psalms" | "psalm" => "Ps",
        "proverbs" => "Prov",
        "ecclesiastes" | "qoheleth" => "Eccl",
        "song of solomon" | "song of songs" | "canticles" => "Song",
        "isaiah" => "Isa",
        "jeremiah" => "Jer",
        "lamentations" => "Lam",
        "ezekiel" => "Ezek",
        "daniel" => "Dan",
        "hosea" => "Hos",
        "obadiah" => "Obad",
        "micah" => "Mic",
        "nahum" => "Nah",
        "habakkuk" => "Hab",
        "zephaniah" => "Zeph",
        "haggai" => "Hag",
        "zechariah" => "Zech",
        "malachi" => "Mal",
        "tobit" => "Tob",
        "judith" => "Jdt",
        "wisdom" | "wisdom of solomon" => "Wis",
        "sirach" | "ecclesiasticus" => "Sir",
        "baruch" => "Bar",
        "1 maccabees" => "1Macc",
        "2 maccabees" => "2Macc",
        "1 esdras" => "1Esd",
        "2 esdras" => "2Esd",
        "prayer of manasseh" => "PrMan",
        "matthew" => "Matt",
        "romans" => "Rom",
        "1 corinthians" => "1Cor",
        "2 corinthians" => "2Cor",
        "galatians" => "Gal",
        "ephesians" => "Eph",
        "philippians" => "Phil",
        "colossians" => "Col",
        "1 thessalonians" => "1Thess",
        "2 thessalonians" => "2Thess",
        "1 timothy" => "1Tim",
        "2 timothy" => "2Tim",
        "philemon" => "Phlm",
        "hebrews" => "Heb",
        "james" => "Jas",
        "1 peter" => "1Pet",
        "2 peter" => "2Pet",
        "1 john" => "1John",
        "2 john" => "2John",
        "3 john" => "3John",
        "revelation" | "apocalypse" => "Rev",
        _ => return None,
    };
    Some(id)
}

/// Normalize well-known versification names that have no definition alias.
pub fn normalize_system_name(name: &str) -> &str {
    match name.trim() {
        "KJV" | "kjv" | "King James" | "Protestant" => "KJV",
        "KJVA" | "kjva" | "KJV with Apocrypha" => "KJVA",
        "Vulg" | "vulg" | "Vulgate" | "vulgate" | "Latin Vulgate" => "Vulg",
        "LXX" | "lxx" | "Septuagint" => "LXX",
        "Catholic" | "catholic" => "Catholic",
        "Catholic2" | "catholic2" => "Catholic2",
        "NRSV" | "nrsv" => "NRSV",
        "NRSVA" | "nrsva" => "NRSVA",
        "MT" | "mt" | "Masoretic" | "Hebrew" => "MT",
        "Leningrad" | "leningrad" => "Leningrad",
        "Synodal" | "synodal" | "Russian" => "Synodal",
        "SynodalProt" | "synodalProt" => "SynodalProt",
        "Luther" | "luther" | "German" => "Luther",
        "Orthodox" | "orthodox" => "Orthodox",
        other => other,
    }
}
