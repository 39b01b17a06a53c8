//! Default device-class detector.

use super::keys::DeviceClass;

const MOBILE_MARKERS: &[&str] = &[
    "Mobile",
    "Android",
    "Silk/",
    "Kindle",
    "BlackBerry",
    "Opera Mini",
    "Opera Mobi",
];

/// User-Agent heuristic matching the markers common mobile browsers send.
pub fn is_mobile_user_agent(user_agent: &str) -> bool {
    MOBILE_MARKERS
        .iter()
        .any(|marker| user_agent.contains(marker))
}

pub fn classify(user_agent: Option<&str>) -> DeviceClass {
    DeviceClass::from_mobile_flag(user_agent.is_some_and(is_mobile_user_agent))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phones_and_tablets_are_mobile() {
        assert!(is_mobile_user_agent(
            "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15 Mobile/15E148"
        ));
        assert!(is_mobile_user_agent(
            "Mozilla/5.0 (Linux; Android 14; Pixel 8) AppleWebKit/537.36"
        ));
        assert!(is_mobile_user_agent("Opera/9.80 (J2ME/MIDP; Opera Mini/9.80)"));
    }

    #[test]
    fn desktop_browsers_are_not_mobile() {
        assert!(!is_mobile_user_agent(
            "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0"
        ));
        assert_eq!(classify(None), DeviceClass::Desktop);
    }
}
