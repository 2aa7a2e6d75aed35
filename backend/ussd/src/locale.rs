//! Screen strings keyed by `(locale, key)`.
//!
//! English is the complete table. Other locales may omit keys; lookups fall
//! back to the configured default locale and finally to English, so the
//! renderer never receives an empty string.

/// Locales the gateway can render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Locale {
    En,
    Fr,
    Sw,
}

impl Locale {
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim().to_ascii_lowercase().as_str() {
            "en" => Some(Self::En),
            "fr" => Some(Self::Fr),
            "sw" => Some(Self::Sw),
            _ => None,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::En => "en",
            Self::Fr => "fr",
            Self::Sw => "sw",
        }
    }
}

/// Every string a screen can be built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextKey {
    RootMenu,
    SelectProjectHeader,
    ProjectLine,
    BackOption,
    ProjectsHeader,
    NoProjects,
    ProjectDetail,
    EnterAmount,
    AmountInvalid,
    ConfirmSummary,
    RoundUpLine,
    ConfirmOptions,
    Success,
    Cancelled,
    InvalidOption,
    InvalidProject,
    InternalError,
    ImpactSummary,
    ImpactEmpty,
    Help,
    ReceiptSms,
}

#[derive(Debug, Clone, Copy)]
pub struct LocaleTable {
    default: Locale,
}

impl LocaleTable {
    pub fn new(default: Locale) -> Self {
        Self { default }
    }

    pub fn default_locale(&self) -> Locale {
        self.default
    }

    pub fn get(&self, locale: Locale, key: TextKey) -> &'static str {
        lookup(locale, key)
            .or_else(|| lookup(self.default, key))
            .unwrap_or_else(|| english(key))
    }

    /// Look up `key` and substitute `{name}` placeholders.
    pub fn render(&self, locale: Locale, key: TextKey, args: &[(&str, &str)]) -> String {
        fill(self.get(locale, key), args)
    }
}

/// Substitute `{name}` placeholders in `template` in one pass; substituted
/// values are copied verbatim. Unknown placeholders are left as written.
pub fn fill(template: &str, args: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let tail = &rest[open..];
        let value = tail.find('}').and_then(|close| {
            let name = &tail[1..close];
            args.iter()
                .find(|(arg, _)| *arg == name)
                .map(|(_, value)| (*value, close))
        });
        match value {
            Some((value, close)) => {
                out.push_str(value);
                rest = &tail[close + 1..];
            }
            None => {
                out.push('{');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn lookup(locale: Locale, key: TextKey) -> Option<&'static str> {
    match locale {
        Locale::En => Some(english(key)),
        Locale::Fr => french(key),
        Locale::Sw => swahili(key),
    }
}

fn english(key: TextKey) -> &'static str {
    use TextKey::*;
    match key {
        RootMenu => {
            "Welcome to PIFP\n1. Donate to a project\n2. View projects\n3. My impact\n4. Help"
        }
        SelectProjectHeader => "Select a project:",
        ProjectLine => "{index}. {name} ({percent}% funded, {location})",
        BackOption => "0. Back",
        ProjectsHeader => "Open projects:",
        NoProjects => "No projects are open for donations right now.",
        ProjectDetail => "{name}\n{description}\nLocation: {location}\nRaised: {raised}/{goal} {currency}",
        EnterAmount => "Enter amount ({min}-{max} {currency}):",
        AmountInvalid => "Invalid amount.",
        ConfirmSummary => "Donate {amount} {currency} to {name}?",
        RoundUpLine => "Round up to {rounded} {currency} and add {donation} {currency} of impact.",
        ConfirmOptions => "1. Confirm\n2. Change amount\n0. Cancel",
        Success => "Thank you! Your donation of {amount} {currency} to {name} is being processed.\nRef: {reference}",
        Cancelled => "Donation cancelled. Thank you for visiting PIFP.",
        InvalidOption => "Invalid option. Please dial again.",
        InvalidProject => "Invalid project selection. Please dial again.",
        InternalError => "Service temporarily unavailable. Please try again later.",
        ImpactSummary => "Your impact:\n{count} donation(s)\nTotal: {total} {currency}",
        ImpactEmpty => "You have not donated yet. Dial again and choose 1 to fund a project.",
        Help => "PIFP funds community projects.\nMoney is released only after proof of impact is verified.\nDial again and choose 1 to donate.",
        ReceiptSms => "PIFP: Thank you for donating {amount} {currency} to {name}. Ref: {reference}",
    }
}

fn french(key: TextKey) -> Option<&'static str> {
    use TextKey::*;
    let text = match key {
        RootMenu => {
            "Bienvenue sur PIFP\n1. Faire un don\n2. Voir les projets\n3. Mon impact\n4. Aide"
        }
        SelectProjectHeader => "Choisissez un projet :",
        ProjectLine => "{index}. {name} ({percent}% financé, {location})",
        BackOption => "0. Retour",
        ProjectsHeader => "Projets ouverts :",
        NoProjects => "Aucun projet n'accepte de dons pour le moment.",
        ProjectDetail => "{name}\n{description}\nLieu : {location}\nCollecté : {raised}/{goal} {currency}",
        EnterAmount => "Entrez le montant ({min}-{max} {currency}) :",
        AmountInvalid => "Montant invalide.",
        ConfirmSummary => "Donner {amount} {currency} à {name} ?",
        RoundUpLine => "Arrondir à {rounded} {currency} et ajouter {donation} {currency} d'impact.",
        ConfirmOptions => "1. Confirmer\n2. Changer le montant\n0. Annuler",
        Success => "Merci ! Votre don de {amount} {currency} à {name} est en cours.\nRéf : {reference}",
        Cancelled => "Don annulé. Merci de votre visite.",
        InvalidOption => "Option invalide. Veuillez recomposer.",
        InvalidProject => "Projet invalide. Veuillez recomposer.",
        InternalError => "Service momentanément indisponible. Réessayez plus tard.",
        ImpactSummary => "Votre impact :\n{count} don(s)\nTotal : {total} {currency}",
        ImpactEmpty => "Vous n'avez pas encore donné. Recomposez et choisissez 1.",
        Help => "PIFP finance des projets communautaires.\nLes fonds sont versés après vérification de l'impact.",
        ReceiptSms => "PIFP : Merci pour votre don de {amount} {currency} à {name}. Réf : {reference}",
    };
    Some(text)
}

fn swahili(key: TextKey) -> Option<&'static str> {
    use TextKey::*;
    let text = match key {
        RootMenu => {
            "Karibu PIFP\n1. Changia mradi\n2. Tazama miradi\n3. Mchango wangu\n4. Msaada"
        }
        SelectProjectHeader => "Chagua mradi:",
        ProjectLine => "{index}. {name} ({percent}% imefadhiliwa, {location})",
        BackOption => "0. Rudi",
        ProjectsHeader => "Miradi iliyo wazi:",
        NoProjects => "Hakuna mradi unaopokea michango kwa sasa.",
        EnterAmount => "Weka kiasi ({min}-{max} {currency}):",
        AmountInvalid => "Kiasi si sahihi.",
        ConfirmSummary => "Changia {amount} {currency} kwa {name}?",
        ConfirmOptions => "1. Thibitisha\n2. Badilisha kiasi\n0. Ghairi",
        Success => "Asante! Mchango wako wa {amount} {currency} kwa {name} unashughulikiwa.\nKumb: {reference}",
        Cancelled => "Mchango umeghairiwa. Asante kwa kutembelea PIFP.",
        InvalidOption => "Chaguo si sahihi. Tafadhali piga tena.",
        InvalidProject => "Mradi si sahihi. Tafadhali piga tena.",
        InternalError => "Huduma haipatikani kwa sasa. Jaribu tena baadaye.",
        ImpactSummary => "Mchango wako:\nMichango {count}\nJumla: {total} {currency}",
        ImpactEmpty => "Bado hujachangia. Piga tena uchague 1.",
        ReceiptSms => "PIFP: Asante kwa kuchangia {amount} {currency} kwa {name}. Kumb: {reference}",
        ProjectDetail | RoundUpLine | Help => return None,
    };
    Some(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_KEYS: [TextKey; 21] = [
        TextKey::RootMenu,
        TextKey::SelectProjectHeader,
        TextKey::ProjectLine,
        TextKey::BackOption,
        TextKey::ProjectsHeader,
        TextKey::NoProjects,
        TextKey::ProjectDetail,
        TextKey::EnterAmount,
        TextKey::AmountInvalid,
        TextKey::ConfirmSummary,
        TextKey::RoundUpLine,
        TextKey::ConfirmOptions,
        TextKey::Success,
        TextKey::Cancelled,
        TextKey::InvalidOption,
        TextKey::InvalidProject,
        TextKey::InternalError,
        TextKey::ImpactSummary,
        TextKey::ImpactEmpty,
        TextKey::Help,
        TextKey::ReceiptSms,
    ];

    #[test]
    fn locale_codes() {
        assert_eq!(Locale::from_code("EN"), Some(Locale::En));
        assert_eq!(Locale::from_code(" sw "), Some(Locale::Sw));
        assert_eq!(Locale::from_code("xx"), None);
        assert_eq!(Locale::Fr.code(), "fr");
    }

    #[test]
    fn every_key_is_non_empty_in_every_locale() {
        for default in [Locale::En, Locale::Fr, Locale::Sw] {
            let table = LocaleTable::new(default);
            for locale in [Locale::En, Locale::Fr, Locale::Sw] {
                for key in ALL_KEYS {
                    assert!(!table.get(locale, key).is_empty(), "{locale:?} {key:?}");
                }
            }
        }
    }

    #[test]
    fn missing_key_falls_back_to_default_locale() {
        let table = LocaleTable::new(Locale::Fr);
        assert_eq!(table.get(Locale::Sw, TextKey::Help), french(TextKey::Help).unwrap());

        let table = LocaleTable::new(Locale::En);
        assert_eq!(table.get(Locale::Sw, TextKey::Help), english(TextKey::Help));
    }

    #[test]
    fn render_fills_placeholders() {
        let table = LocaleTable::new(Locale::En);
        let text = table.render(
            Locale::En,
            TextKey::EnterAmount,
            &[("min", "100"), ("max", "10000"), ("currency", "KES")],
        );
        assert_eq!(text, "Enter amount (100-10000 KES):");
    }

    #[test]
    fn substituted_values_are_not_expanded_again() {
        let text = fill(
            "{name} Ref: {reference}",
            &[("name", "Well {reference}"), ("reference", "PIFP-1")],
        );
        assert_eq!(text, "Well {reference} Ref: PIFP-1");
    }

    #[test]
    fn unknown_placeholders_and_stray_braces_are_kept() {
        assert_eq!(fill("{missing} {a", &[("a", "x")]), "{missing} {a");
        assert_eq!(fill("{{a}}", &[("a", "x")]), "{x}");
    }

    #[test]
    fn root_menu_lists_four_options() {
        let table = LocaleTable::new(Locale::En);
        for locale in [Locale::En, Locale::Fr, Locale::Sw] {
            let menu = table.get(locale, TextKey::RootMenu);
            for option in ["1.", "2.", "3.", "4."] {
                assert!(menu.contains(option), "{locale:?} missing {option}");
            }
        }
    }
}
