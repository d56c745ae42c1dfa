//! Display names that need no network lookup.

const VENDOR_SYSTEM_APPS: &[(&str, &str)] = &[
    ("com.android.settings", "设置"),
    ("com.coloros.filemanager", "文件管理"),
    ("com.oplus.camera", "相机"),
    ("com.coloros.gallery3d", "相册"),
    ("com.coloros.calendar", "日历"),
    ("com.coloros.note", "笔记"),
    ("com.coloros.alarmclock", "时钟"),
    ("com.coloros.calculator", "计算器"),
    ("com.android.contacts", "联系人"),
    ("com.android.mms", "信息"),
    ("com.android.email", "邮件"),
    ("com.coloros.weather2", "天气"),
    ("com.heytap.browser", "浏览器"),
    ("com.coloros.compass2", "指南针"),
    ("com.coloros.soundrecorder", "录音"),
    ("com.coloros.translate", "翻译"),
    ("com.oplus.tips", "使用技巧"),
    ("com.android.chrome", "Chrome"),
    ("com.android.vending", "Play 商店"),
];

const INTERNATIONAL_APPS: &[(&str, &str)] = &[
    ("com.twitter.android", "Twitter / X"),
    ("com.instagram.android", "Instagram"),
    ("com.whatsapp", "WhatsApp"),
    ("org.telegram.messenger", "Telegram"),
    ("com.facebook.katana", "Facebook"),
    ("com.facebook.orca", "Messenger"),
    ("com.facebook.lite", "Facebook Lite"),
    ("com.discord", "Discord"),
    ("com.snapchat.android", "Snapchat"),
    ("com.reddit.frontpage", "Reddit"),
    ("com.pinterest", "Pinterest"),
    ("com.linkedin.android", "LinkedIn"),
    ("com.tumblr", "Tumblr"),
    ("com.spotify.music", "Spotify"),
    ("com.netflix.mediaclient", "Netflix"),
    ("com.google.android.youtube", "YouTube"),
    ("com.amazon.mShop.android.shopping", "Amazon Shopping"),
    ("com.paypal.android.p2pmobile", "PayPal"),
    ("com.ubercab", "Uber"),
    ("com.skype.raider", "Skype"),
    ("us.zoom.videomeetings", "Zoom"),
    ("com.microsoft.teams", "Microsoft Teams"),
    ("com.microsoft.office.outlook", "Outlook"),
    ("com.google.android.apps.maps", "Google Maps"),
    ("com.google.android.gm", "Gmail"),
    ("com.google.android.apps.docs", "Google Docs"),
    ("com.google.android.apps.photos", "Google Photos"),
    ("com.google.android.keep", "Google Keep"),
    ("com.google.android.calendar", "Google Calendar"),
    ("com.google.android.apps.translate", "Google Translate"),
    ("com.google.android.apps.meetings", "Google Meet"),
    ("com.google.android.googlequicksearchbox", "Google"),
    ("com.google.android.dialer", "Google Phone"),
    ("com.amazon.kindle", "Kindle"),
    ("tv.twitch.android.app", "Twitch"),
    ("org.mozilla.firefox", "Firefox"),
    ("com.microsoft.emmx", "Edge"),
    ("com.brave.browser", "Brave"),
    ("com.opera.browser", "Opera"),
    ("org.videolan.vlc", "VLC"),
    ("com.shopee.id", "Shopee"),
    ("com.tiktok.tiktok_tv", "TikTok TV"),
];

/// Vendor system apps first, then well-known international apps.
pub fn known_name(identifier: &str) -> Option<&'static str> {
    VENDOR_SYSTEM_APPS
        .iter()
        .chain(INTERNATIONAL_APPS.iter())
        .find(|(pkg, _)| *pkg == identifier)
        .map(|(_, name)| *name)
}

#[cfg(test)]
mod tests {
    use super::known_name;

    #[test]
    fn finds_both_tables() {
        assert_eq!(known_name("com.android.settings"), Some("设置"));
        assert_eq!(known_name("com.whatsapp"), Some("WhatsApp"));
        assert_eq!(known_name("com.example.unknown"), None);
    }
}
