/// Prompt rendering for archetype templates.
///
/// Canonical placeholder syntax is `{{key}}`; the legacy `[[key]]`, `{[key]}`
/// and `[key]` spellings still appear in stored templates and are normalized
/// before substitution. Unknown placeholders render as empty strings, never
/// as errors, and resolved values are translated toward the provider's
/// expected language word by word, keeping unrecognized words verbatim.
use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::Value;
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

static VAR_TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*([A-Za-z0-9_]+)\s*\}\}").expect("hardcoded regex"));

static WORD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\w+\b").expect("hardcoded regex"));

static NON_KEY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9_]+").expect("hardcoded regex"));

/// Legacy placeholder spellings, replaced in order ([[key]] before [key]).
static LEGACY_VAR_RES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"\[\[\s*([A-Za-z_][A-Za-z0-9_]*)\s*\]\]",
        r"\{\[\s*([A-Za-z_][A-Za-z0-9_]*)\s*\]\}",
        r"\[\s*([A-Za-z_][A-Za-z0-9_]*)\s*\]",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("hardcoded regex"))
    .collect()
});

static EXACT_TRANSLATIONS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("sim", "yes"),
        ("nao", "no"),
        ("masculino", "male"),
        ("feminino", "female"),
        ("homem", "man"),
        ("mulher", "woman"),
        ("loiro", "blond"),
        ("castanho", "brown"),
        ("preto", "black"),
        ("ruivo", "red"),
        ("grisalho", "gray"),
        ("solteiro", "single"),
        ("casado", "married"),
        ("divorciado", "divorced"),
        ("viuvo", "widowed"),
    ])
});

static WORD_TRANSLATIONS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("anos", "years"),
        ("ano", "year"),
        ("empreendimento", "business"),
        ("empreendimentos", "businesses"),
        ("vendas", "sales"),
        ("venda", "sale"),
        ("corretor", "broker"),
        ("consultor", "consultant"),
        ("cliente", "client"),
        ("clientes", "clients"),
        ("premium", "premium"),
        ("iniciante", "beginner"),
        ("avancado", "advanced"),
        ("experiente", "experienced"),
        ("alto", "high"),
        ("media", "medium"),
        ("baixo", "low"),
    ])
});

const GENDER_ALIASES: &[&str] = &["genero_para_criacao_do_avatar", "genero", "sexo", "gender"];
const HAIR_ALIASES: &[&str] = &[
    "cor_do_seu_cabelo",
    "cor_do_cabelo",
    "cor_cabelo",
    "hair_color",
    "cor_do_cabelo_participante",
];

fn strip_accents(text: &str) -> String {
    text.nfd().filter(|c| !is_combining_mark(*c)).collect()
}

/// Normalizes a placeholder key: delimiters and diacritics stripped,
/// lowercased, runs of non `[a-z0-9_]` collapsed to a single underscore.
#[must_use]
pub fn normalize_key(raw: &str) -> String {
    let lowered = strip_accents(raw.trim()).to_lowercase();
    NON_KEY_RE
        .replace_all(&lowered, "_")
        .trim_matches('_')
        .to_string()
}

/// Rewrites legacy placeholder spellings to the canonical `{{key}}` form.
#[must_use]
pub fn normalize_placeholders(template: &str) -> String {
    let mut normalized = template.to_string();
    for pattern in LEGACY_VAR_RES.iter() {
        normalized = pattern
            .replace_all(&normalized, |caps: &Captures<'_>| {
                format!("{{{{{}}}}}", normalize_key(&caps[1]))
            })
            .into_owned();
    }
    normalized
}

/// Resolves a placeholder against the normalized payload, trying the alias
/// table and semantic-group heuristics before giving up.
///
/// Avoids silent empty replacements when key spellings drift between the
/// quiz frontend and stored archetype templates.
fn resolve_value<'a>(key: &str, payload: &'a HashMap<String, Value>) -> Option<&'a Value> {
    if key.is_empty() {
        return None;
    }
    if let Some(value) = payload.get(key) {
        return Some(value);
    }

    let alias_group: Option<&[&str]> = if GENDER_ALIASES.contains(&key)
        || key.contains("genero")
        || key.contains("sexo")
        || key == "gender"
    {
        Some(GENDER_ALIASES)
    } else if HAIR_ALIASES.contains(&key) || key.contains("cabelo") || key.contains("hair") {
        Some(HAIR_ALIASES)
    } else {
        None
    };

    alias_group?
        .iter()
        .find_map(|alias| payload.get(*alias))
}

fn translate_text(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    let normalized = strip_accents(trimmed).to_lowercase();
    if let Some(exact) = EXACT_TRANSLATIONS.get(normalized.as_str()) {
        return (*exact).to_string();
    }

    WORD_RE
        .replace_all(trimmed, |caps: &Captures<'_>| {
            let word = &caps[0];
            let key = strip_accents(word).to_lowercase();
            WORD_TRANSLATIONS
                .get(key.as_str())
                .map_or_else(|| word.to_string(), |translated| (*translated).to_string())
        })
        .into_owned()
}

/// Converts a resolved answer value to its prompt form, translating toward
/// English without losing unrecognized words.
#[must_use]
pub fn translate_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(flag) => if *flag { "yes" } else { "no" }.to_string(),
        Value::Number(number) => number.to_string(),
        Value::String(text) => translate_text(text),
        Value::Array(items) => items
            .iter()
            .filter(|item| !item.is_null())
            .map(translate_value)
            .collect::<Vec<_>>()
            .join(", "),
        Value::Object(_) => value.to_string(),
    }
}

/// Renders a template against a credential's answer payload.
///
/// Rendering never fails: unresolved placeholders become empty strings,
/// blank lines collapse and each remaining line is trimmed. The operation is
/// idempotent.
#[must_use]
pub fn render(template: &str, data: &Value) -> String {
    let raw = normalize_placeholders(template).trim().to_string();
    if raw.is_empty() {
        return String::new();
    }

    let payload: HashMap<String, Value> = data
        .as_object()
        .map(|object| {
            object
                .iter()
                .filter_map(|(key, value)| {
                    let normalized = normalize_key(key);
                    (!normalized.is_empty()).then(|| (normalized, value.clone()))
                })
                .collect()
        })
        .unwrap_or_default();

    let rendered = VAR_TOKEN_RE.replace_all(&raw, |caps: &Captures<'_>| {
        let key = normalize_key(&caps[1]);
        resolve_value(&key, &payload)
            .map(translate_value)
            .unwrap_or_default()
    });

    rendered
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Subject gender from the quiz answers; out-of-domain values coerce to the
/// safe default rather than erroring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gender {
    Mulher,
    Homem,
}

impl Gender {
    #[must_use]
    pub fn coerce(raw: Option<&str>) -> Self {
        match raw.map(|value| value.trim().to_lowercase()).as_deref() {
            Some("homem") => Gender::Homem,
            _ => Gender::Mulher,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Gender::Mulher => "mulher",
            Gender::Homem => "homem",
        }
    }
}

/// Subject hair color, coerced the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HairColor {
    Loiro,
    Castanho,
    Preto,
    Ruivo,
    Grisalho,
}

impl HairColor {
    #[must_use]
    pub fn coerce(raw: Option<&str>) -> Self {
        match raw.map(|value| value.trim().to_lowercase()).as_deref() {
            Some("loiro") => HairColor::Loiro,
            Some("preto") => HairColor::Preto,
            Some("ruivo") => HairColor::Ruivo,
            Some("grisalho") => HairColor::Grisalho,
            _ => HairColor::Castanho,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            HairColor::Loiro => "loiro",
            HairColor::Castanho => "castanho",
            HairColor::Preto => "preto",
            HairColor::Ruivo => "ruivo",
            HairColor::Grisalho => "grisalho",
        }
    }
}

/// Generation inputs extracted from a credential payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubjectProfile {
    pub gender: Gender,
    pub hair_color: HairColor,
}

impl SubjectProfile {
    #[must_use]
    pub fn from_data(data: &Value) -> Self {
        let gender = Gender::coerce(data.get("gender").and_then(Value::as_str));
        let hair_color = HairColor::coerce(data.get("hair_color").and_then(Value::as_str));
        Self { gender, hair_color }
    }
}

/// Fixed editorial portrait prompt, assembled only in the backend; the quiz
/// frontend can only steer the controlled gender/hair variables.
const EDITORIAL_TEMPLATE: &str = "Portrait orientation 1:1, professional color studio portrait of a \
{quality} {hair} {noun}, medium shot.\n\
Maintain original facial features, proportions, skin tone, hair length, hair volume and hairstyle shape.\n\
Do not add wrinkles or signs of aging. Preserve youthful skin without altering facial structure.\n\
Color editorial studio portrait, three-quarter angle composition. Body slightly tilted, face facing left, \
eyes looking forward with a calm and confident side glance.\n\
Facial expression: subtle happy expression. Natural, relaxed smile. Soft smile with slightly lifted cheeks \
and gentle brightness in the eyes. No exaggerated grin, no forced smile.\n\
Professional studio lighting with natural daylight quality. Soft key light from one side, simulating large \
studio window light. Cinematic side lighting creating subtle chiaroscuro. Clean separation between subject \
and background using light, not artificial blur.\n\
Strong solid blue seamless background, infinite studio backdrop. Deep sky blue background, evenly lit from \
edge to edge. No texture, no gradients, no visible edges.\n\
Real human skin with visible pores and natural skin texture. No plastic look, no beauty retouching.";

/// Builds the fixed editorial prompt for a coerced subject profile.
#[must_use]
pub fn build_editorial_prompt(profile: SubjectProfile) -> String {
    let (quality, noun) = match profile.gender {
        Gender::Mulher => ("beautiful", "woman"),
        Gender::Homem => ("handsome", "man"),
    };
    let hair = match profile.hair_color {
        HairColor::Loiro => "blond",
        HairColor::Castanho => "brunette",
        HairColor::Preto => "black-haired",
        HairColor::Ruivo => "red-haired",
        HairColor::Grisalho => "gray-haired",
    };

    EDITORIAL_TEMPLATE
        .replace("{quality}", quality)
        .replace("{hair}", hair)
        .replace("{noun}", noun)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalize_key_strips_delimiters_and_accents() {
        assert_eq!(normalize_key("{{ Cor do Cabelo }}"), "cor_do_cabelo");
        assert_eq!(normalize_key("[[gênero]]"), "genero");
        assert_eq!(normalize_key("  profissão atual "), "profissao_atual");
        assert_eq!(normalize_key(""), "");
    }

    #[test]
    fn legacy_syntaxes_render_identically_to_canonical() {
        let data = json!({ "city": "Lisboa" });
        let canonical = render("from {{city}}", &data);

        assert_eq!(render("from [[city]]", &data), canonical);
        assert_eq!(render("from {[city]}", &data), canonical);
        assert_eq!(render("from [city]", &data), canonical);
        assert_eq!(canonical, "from Lisboa");
    }

    #[test]
    fn unknown_placeholders_render_empty() {
        let rendered = render("hello {{missing_key}} world", &json!({}));
        assert_eq!(rendered, "hello  world");
    }

    #[test]
    fn rendering_is_idempotent() {
        let data = json!({ "gender": "mulher" });
        let once = render("a {{gender}} b", &data);
        let twice = render(&once, &data);
        assert_eq!(once, twice);
    }

    #[test]
    fn alias_table_resolves_hair_color_spellings() {
        let data = json!({ "cor_do_cabelo": "castanho" });
        let rendered = render("portrait of a {{cor_do_seu_cabelo}} person", &data);
        assert_eq!(rendered, "portrait of a brown person");
    }

    #[test]
    fn heuristic_resolves_unlisted_gender_keys() {
        let data = json!({ "sexo": "homem" });
        let rendered = render("{{genero_do_participante}}", &data);
        assert_eq!(rendered, "man");
    }

    #[test]
    fn exact_translation_beats_word_translation() {
        assert_eq!(translate_value(&json!("não")), "no");
        assert_eq!(translate_value(&json!("Sim")), "yes");
        assert_eq!(translate_value(&json!("grisalho")), "gray");
    }

    #[test]
    fn word_translation_preserves_unknown_words() {
        assert_eq!(
            translate_value(&json!("corretor premium de imóveis")),
            "broker premium de imóveis"
        );
        assert_eq!(translate_value(&json!("5 anos")), "5 years");
    }

    #[test]
    fn scalar_values_translate_predictably() {
        assert_eq!(translate_value(&json!(true)), "yes");
        assert_eq!(translate_value(&json!(false)), "no");
        assert_eq!(translate_value(&json!(12)), "12");
        assert_eq!(translate_value(&Value::Null), "");
        assert_eq!(translate_value(&json!(["sim", "5 anos"])), "yes, 5 years");
    }

    #[test]
    fn blank_lines_collapse_and_lines_trim() {
        let rendered = render("  first line  \n\n\n   second {{x}} line  \n", &json!({}));
        assert_eq!(rendered, "first line\nsecond  line");
    }

    #[test]
    fn profile_coerces_out_of_domain_values() {
        let profile = SubjectProfile::from_data(&json!({
            "gender": "robot",
            "hair_color": "azul",
        }));
        assert_eq!(profile.gender, Gender::Mulher);
        assert_eq!(profile.hair_color, HairColor::Castanho);

        let profile = SubjectProfile::from_data(&json!({
            "gender": " Homem ",
            "hair_color": "LOIRO",
        }));
        assert_eq!(profile.gender, Gender::Homem);
        assert_eq!(profile.hair_color, HairColor::Loiro);
    }

    #[test]
    fn editorial_prompt_maps_profile_tokens() {
        let prompt = build_editorial_prompt(SubjectProfile {
            gender: Gender::Mulher,
            hair_color: HairColor::Loiro,
        });
        assert!(prompt.contains("beautiful blond woman"));

        let prompt = build_editorial_prompt(SubjectProfile {
            gender: Gender::Homem,
            hair_color: HairColor::Preto,
        });
        assert!(prompt.contains("handsome black-haired man"));
        assert!(prompt.contains("Deep sky blue background"));
    }
}
