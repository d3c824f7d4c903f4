// crates/mediaconv-engine/src/iso639.rs
//
// ISO 639-2 language code validation (§4.5/§4.6 "emitted language is in
// ISO 639-2 or omitted", §8 testable property). Covers the codes that show
// up in practice in MP4/Matroska/WebM language tags plus `und` (undetermined,
// ISO 639-2's catch-all) — not the full ~480-entry registry, but anything
// missing here falls back to omitting the tag rather than emitting garbage.

const CODES: &[&str] = &[
    "aar", "abk", "afr", "aka", "amh", "ara", "arg", "asm", "ava", "ave", "aym", "aze", "bak",
    "bam", "bel", "ben", "bis", "bod", "bos", "bre", "bul", "cat", "ces", "cha", "che", "chu",
    "chv", "cor", "cos", "cre", "cym", "dan", "deu", "div", "dzo", "ell", "eng", "epo", "est",
    "eus", "ewe", "fao", "fas", "fij", "fin", "fra", "fry", "ful", "gla", "gle", "glg", "glv",
    "grn", "guj", "hat", "hau", "heb", "her", "hin", "hmo", "hrv", "hun", "hye", "ibo", "ido",
    "iii", "iku", "ile", "ina", "ind", "ipk", "isl", "ita", "jav", "jpn", "kal", "kan", "kas",
    "kat", "kau", "kaz", "khm", "kik", "kin", "kir", "kom", "kon", "kor", "kua", "kur", "lao",
    "lat", "lav", "lim", "lin", "lit", "ltz", "lub", "lug", "mah", "mal", "mar", "mkd", "mlg",
    "mlt", "mon", "mri", "msa", "mya", "nau", "nav", "nbl", "nde", "ndo", "nep", "nld", "nno",
    "nob", "nor", "nya", "oci", "oji", "ori", "orm", "oss", "pan", "pli", "pol", "por", "pus",
    "que", "roh", "ron", "run", "rus", "sag", "san", "sin", "slk", "slv", "sme", "smo", "sna",
    "snd", "som", "sot", "spa", "sqi", "srd", "srp", "ssw", "sun", "swa", "swe", "tah", "tam",
    "tat", "tel", "tgk", "tgl", "tha", "tir", "ton", "tsn", "tso", "tuk", "tur", "twi", "uig",
    "ukr", "urd", "uzb", "ven", "vie", "vol", "wln", "wol", "xho", "yid", "yor", "zha", "zho",
    "zul", "und",
];

/// Whether `code` (case-insensitively) is a recognized ISO 639-2 code.
pub fn is_valid(code: &str) -> bool {
    let lower = code.to_ascii_lowercase();
    CODES.contains(&lower.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_common_codes_case_insensitively() {
        assert!(is_valid("eng"));
        assert!(is_valid("ENG"));
        assert!(is_valid("jpn"));
    }

    #[test]
    fn rejects_bogus_codes() {
        assert!(!is_valid("xyz"));
        assert!(!is_valid(""));
        assert!(!is_valid("english"));
    }

    #[test]
    fn accepts_undetermined() {
        assert!(is_valid("und"));
    }
}
