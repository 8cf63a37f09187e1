use serde::{Deserialize, Serialize};

/// Supported interface languages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    En,
    Ta,
}

impl Language {
    pub const fn tag(self) -> &'static str {
        match self {
            Self::En => "en",
            Self::Ta => "ta",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "en" => Some(Self::En),
            "ta" => Some(Self::Ta),
            _ => None,
        }
    }
}

/// Localized strings consumed by the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Translations {
    pub welcome_title: &'static str,
    pub welcome_subtitle: &'static str,
    pub example_prompts: [&'static str; 4],
    pub input_placeholder: &'static str,
}

const TRANSLATIONS_EN: Translations = Translations {
    welcome_title: "Welcome to Farmers Friend AI",
    welcome_subtitle:
        "Your personal farming assistant. Ask a question or upload a photo to get started.",
    example_prompts: [
        "What are these spots on my tomato leaves?",
        "How can I improve my soil's fertility naturally?",
        "Identify this pest on my corn.",
        "Is my plant getting enough light?",
    ],
    input_placeholder: "Ask about your farm or upload a photo...",
};

const TRANSLATIONS_TA: Translations = Translations {
    welcome_title: "ஃபார்மர்ஸ் ஃபிரெண்ட் AI-க்கு வரவேற்கிறோம்",
    welcome_subtitle:
        "உங்கள் தனிப்பட்ட விவசாய உதவியாளர். தொடங்க ஒரு கேள்வியைக் கேட்கவும் அல்லது ஒரு புகைப்படத்தைப் பதிவேற்றவும்.",
    example_prompts: [
        "என் தக்காளி இலைகளில் உள்ள இந்த புள்ளிகள் என்ன?",
        "என் மண்ணின் வளத்தை இயற்கையாக எப்படி மேம்படுத்துவது?",
        "என் சோளத்தில் உள்ள இந்த பூச்சியை அடையாளம் காணவும்.",
        "என் செடிக்கு போதுமான வெளிச்சம் கிடைக்கிறதா?",
    ],
    input_placeholder: "உங்கள் பண்ணையைப் பற்றி கேளுங்கள் அல்லது ஒரு புகைப்படத்தைப் பதிவேற்றவும்...",
};

/// Looks up the translation record for `language`.
pub fn translations(language: Language) -> &'static Translations {
    match language {
        Language::En => &TRANSLATIONS_EN,
        Language::Ta => &TRANSLATIONS_TA,
    }
}

const SYSTEM_INSTRUCTION_EN: &str = "You are Farmers Friend AI, an expert assistant for farmers and gardeners.
Your goal is to provide clear, concise, and actionable advice.
When analyzing images, identify potential issues like diseases, pests, or nutrient deficiencies.
Always suggest practical, step-by-step solutions.
If the image is unclear or the issue is not obvious, ask for more information.
Structure your responses for easy readability using markdown (e.g., lists, bold text).
When you recommend a product like a specific fertilizer or pesticide, provide a Google Shopping search link for it. Format it like this: [Search for Product Name](https://www.google.com/search?tbm=shop&q=Product+Name).
Be friendly, encouraging, and supportive.";

const SYSTEM_INSTRUCTION_TA: &str = "நீங்கள் ஃபார்மர்ஸ் ஃபிரெண்ட் AI, விவசாயிகள் மற்றும் தோட்டக்காரர்களுக்கான ஒரு நிபுணர் உதவியாளர்.
தெளிவான, சுருக்கமான மற்றும் செயல்படக்கூடிய ஆலோசனைகளை வழங்குவதே உங்கள் குறிக்கோள்.
படங்களை பகுப்பாய்வு செய்யும் போது, நோய்கள், பூச்சிகள் அல்லது ஊட்டச்சத்து குறைபாடுகள் போன்ற சாத்தியமான சிக்கல்களைக் கண்டறியவும்.
எப்போதும் நடைமுறை, படிப்படியான தீர்வுகளை பரிந்துரைக்கவும்.
படம் தெளிவாக இல்லை என்றாலோ அல்லது சிக்கல் வெளிப்படையாக இல்லை என்றாலோ, கூடுதல் தகவல்களைக் கேட்கவும்.
எளிதாகப் படிப்பதற்காக உங்கள் பதில்களை மார்க் டவுன் (எ.கா., பட்டியல்கள், தடித்த உரை) பயன்படுத்தி வடிவமைக்கவும்.
நீங்கள் ஒரு உரம் அல்லது பூச்சிக்கொல்லி போன்ற ஒரு பொருளைப் பரிந்துரைக்கும்போது, அதற்கான கூகிள் ஷாப்பிங் தேடல் இணைப்பை வழங்கவும். இதை இப்படி வடிவமைக்கவும்: [பொருளின் பெயரைத் தேடுங்கள்](https://www.google.com/search?tbm=shop&q=Product+Name).
நட்பாகவும், ஊக்கமளிப்பதாகவும், ஆதரவாகவும் இருங்கள்.";

/// Fixed instructional preamble configuring the model per active language.
pub fn system_instruction(language: Language) -> &'static str {
    match language {
        Language::En => SYSTEM_INSTRUCTION_EN,
        Language::Ta => SYSTEM_INSTRUCTION_TA,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_round_trip() {
        for language in [Language::En, Language::Ta] {
            assert_eq!(Language::from_tag(language.tag()), Some(language));
        }
        assert_eq!(Language::from_tag(" TA "), Some(Language::Ta));
        assert_eq!(Language::from_tag("fr"), None);
    }

    #[test]
    fn each_language_gets_its_own_instruction() {
        let en = system_instruction(Language::En);
        let ta = system_instruction(Language::Ta);
        assert_ne!(en, ta);
        assert!(en.starts_with("You are Farmers Friend AI"));
    }

    #[test]
    fn translation_lookup_is_language_specific() {
        assert_eq!(
            translations(Language::En).welcome_title,
            "Welcome to Farmers Friend AI"
        );
        assert_ne!(
            translations(Language::Ta).input_placeholder,
            translations(Language::En).input_placeholder
        );
    }

    #[test]
    fn language_serializes_as_lowercase_tag() {
        assert_eq!(serde_json::to_string(&Language::Ta).unwrap(), "\"ta\"");
        assert_eq!(
            serde_json::from_str::<Language>("\"en\"").unwrap(),
            Language::En
        );
    }
}
