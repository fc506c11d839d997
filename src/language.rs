// 缓存键用语言代码，prompt 用完整名称

struct LanguageInfo {
    code: &'static str,
    name: &'static str,
    aliases: &'static [&'static str],
}

const LANGUAGES: &[LanguageInfo] = &[
    LanguageInfo { code: "es", name: "Spanish", aliases: &["spa", "español", "espanol", "castellano", "castilian"] },
    LanguageInfo { code: "en", name: "English", aliases: &["eng"] },
    LanguageInfo { code: "fr", name: "French", aliases: &["fra", "fre", "français", "francais"] },
    LanguageInfo { code: "de", name: "German", aliases: &["deu", "ger", "deutsch"] },
    LanguageInfo { code: "it", name: "Italian", aliases: &["ita", "italiano"] },
    LanguageInfo { code: "pt", name: "Portuguese", aliases: &["por", "português", "portugues"] },
    LanguageInfo { code: "ja", name: "Japanese", aliases: &["jpn", "日本語", "nihongo"] },
    LanguageInfo { code: "zh", name: "Chinese", aliases: &["cmn", "zho", "中文", "mandarin"] },
    LanguageInfo { code: "ko", name: "Korean", aliases: &["kor", "한국어", "hangul"] },
    LanguageInfo { code: "ru", name: "Russian", aliases: &["rus", "русский"] },
    LanguageInfo { code: "ar", name: "Arabic", aliases: &["ara", "العربية"] },
    LanguageInfo { code: "nl", name: "Dutch", aliases: &["nld", "nederlands"] },
    LanguageInfo { code: "sv", name: "Swedish", aliases: &["swe", "svenska"] },
    LanguageInfo { code: "no", name: "Norwegian", aliases: &["nor", "norsk"] },
    LanguageInfo { code: "da", name: "Danish", aliases: &["dan", "dansk"] },
    LanguageInfo { code: "pl", name: "Polish", aliases: &["pol", "polski"] },
    LanguageInfo { code: "cs", name: "Czech", aliases: &["ces", "čeština", "cestina"] },
    LanguageInfo { code: "hu", name: "Hungarian", aliases: &["hun", "magyar"] },
    LanguageInfo { code: "fi", name: "Finnish", aliases: &["fin", "suomi"] },
    LanguageInfo { code: "tr", name: "Turkish", aliases: &["tur", "türkçe", "turkce"] },
    LanguageInfo { code: "el", name: "Greek", aliases: &["ell", "ελληνικά", "ellinika"] },
    LanguageInfo { code: "he", name: "Hebrew", aliases: &["heb", "עברית"] },
    LanguageInfo { code: "hi", name: "Hindi", aliases: &["hin", "हिन्दी"] },
    LanguageInfo { code: "th", name: "Thai", aliases: &["tha", "ไทย"] },
    LanguageInfo { code: "vi", name: "Vietnamese", aliases: &["vie", "tiếng việt", "tieng viet"] },
];

fn lookup(input: &str) -> Option<&'static LanguageInfo> {
    let cleaned = input.trim().to_lowercase();
    if cleaned.is_empty() {
        return None;
    }
    LANGUAGES.iter().find(|lang| {
        lang.code == cleaned
            || lang.name.to_lowercase() == cleaned
            || lang.aliases.iter().any(|alias| *alias == cleaned)
    })
}

/// 归一化为语言代码；未知语言返回去掉首尾空白的小写原文
pub fn language_code(input: &str) -> String {
    match lookup(input) {
        Some(lang) => lang.code.to_string(),
        None => input.trim().to_lowercase(),
    }
}

/// 归一化为完整名称；未知语言原样返回（去掉首尾空白）
pub fn language_name(input: &str) -> String {
    match lookup(input) {
        Some(lang) => lang.name.to_string(),
        None => input.trim().to_string(),
    }
}
