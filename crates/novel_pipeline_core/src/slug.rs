//! URL slugs for chapters.

/// Latin letters with diacritics folded to their ASCII base letters.
const FOLDS: &[(&str, &str)] = &[
    ("àáảãạăằắẳẵặâầấẩẫậäåāąǎ", "a"),
    ("çćĉċč", "c"),
    ("ďđð", "d"),
    ("èéẻẽẹêềếểễệëēĕėęě", "e"),
    ("ĝğġģ", "g"),
    ("ĥħ", "h"),
    ("ìíỉĩịïīĭįıǐ", "i"),
    ("ĵ", "j"),
    ("ķ", "k"),
    ("ĺļľŀł", "l"),
    ("ñńņňŉ", "n"),
    ("òóỏõọôồốổỗộơờớởỡợöøōŏőǒ", "o"),
    ("ŕŗř", "r"),
    ("śŝşšș", "s"),
    ("ţťŧț", "t"),
    ("ùúủũụưừứửữựüūŭůűųǔ", "u"),
    ("ŵ", "w"),
    ("ỳýỷỹỵÿŷ", "y"),
    ("źżž", "z"),
    ("ß", "ss"),
    ("æ", "ae"),
    ("œ", "oe"),
    ("þ", "th"),
];

fn fold(c: char) -> Option<&'static str> {
    FOLDS
        .iter()
        .find(|(set, _)| set.contains(c))
        .map(|&(_, base)| base)
}

/// Lowercase ASCII words joined by single hyphens. Characters with no ASCII
/// fold are dropped, so the result may be empty.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_dash = false;
    for c in text.chars().flat_map(char::to_lowercase) {
        let mut buf = [0; 4];
        let folded = if c.is_ascii_alphanumeric() {
            Some(&*c.encode_utf8(&mut buf))
        } else {
            fold(c)
        };
        match folded {
            Some(letters) => {
                if pending_dash && !slug.is_empty() {
                    slug.push('-');
                }
                pending_dash = false;
                slug.push_str(letters);
            }
            None if c.is_whitespace() || c == '-' || c == '_' => pending_dash = true,
            None => {}
        }
    }
    slug
}

/// `{volume}-{title}`, with positional fallbacks when either part has no
/// sluggable characters.
pub fn chapter_slug(volume_name: &str, volume_position: i32, title: &str, position: i32) -> String {
    let volume = match slugify(volume_name) {
        s if s.is_empty() => format!("tap-{volume_position}"),
        s => s,
    };
    let chapter = match slugify(title) {
        s if s.is_empty() => format!("chuong-{position}"),
        s => s,
    };
    format!("{volume}-{chapter}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugifies_ascii_and_vietnamese() {
        assert_eq!(slugify("Hello, World!"), "hello-world");
        assert_eq!(slugify("  Chương 1: Khởi đầu  "), "chuong-1-khoi-dau");
        assert_eq!(slugify("a -- b__c"), "a-b-c");
        assert_eq!(slugify("日本語"), "");
    }

    #[test]
    fn folds_other_latin_alphabets() {
        assert_eq!(slugify("Šťastný žluťoučký"), "stastny-zlutoucky");
        assert_eq!(slugify("Straße"), "strasse");
        assert_eq!(slugify("Łódź"), "lodz");
        assert_eq!(slugify("Ærøskøbing"), "aeroskobing");
        assert_eq!(slugify("Đà Nẵng"), "da-nang");
    }

    #[test]
    fn chapter_slug_falls_back_to_positions() {
        assert_eq!(chapter_slug("Volume 1", 1, "The Start", 3), "volume-1-the-start");
        assert_eq!(chapter_slug("日本", 2, "語", 4), "tap-2-chuong-4");
    }
}
