//! Store category keys and tags mapped onto the fixed enumeration.

use storage::Category;

/// International store category key (`TOOLS`, `game_puzzle`, `Art & Design`).
pub fn store_category(key: &str) -> Option<Category> {
    let key = key
        .trim()
        .to_ascii_lowercase()
        .replace('&', "and")
        .replace(' ', "_");
    if key == "game" || key.starts_with("game_") {
        return Some(Category::Games);
    }
    let category = match key.as_str() {
        "communication" | "social" | "dating" => Category::Social,
        "shopping" => Category::Shopping,
        "finance" => Category::Finance,
        "tools" | "productivity" | "business" | "personalization" | "weather"
        | "libraries_and_demo" => Category::SystemTools,
        "education" | "word" => Category::Learning,
        "photography" | "art_and_design" => Category::MediaTools,
        "news_and_magazines" => Category::NewsCommunity,
        "travel_and_local" | "maps_and_navigation" | "auto_and_vehicles" => Category::Travel,
        "food_and_drink" => Category::FoodDelivery,
        "entertainment" | "music_and_audio" | "video_players" | "books_and_reference"
        | "comics" | "sports" => Category::Entertainment,
        "house_and_home" => Category::SmartHome,
        "beauty" | "events" | "health_and_fitness" | "lifestyle" | "medical" | "parenting" => {
            Category::LifeServices
        }
        _ => return None,
    };
    Some(category)
}

/// Domestic store tag or top-level category name.
pub fn domestic_tag(tag: &str) -> Option<Category> {
    let category = match tag.trim() {
        "好友社交" | "社交" | "即时通讯" | "通讯" | "聊天社交" => Category::Social,
        "社区" | "综合社区" | "综合社区/论坛" | "新闻" | "资讯" | "论坛" => {
            Category::NewsCommunity
        }
        "视频" | "短视频" | "音乐" | "直播" | "在线视频" | "影视" | "漫画" | "阅读" | "小说"
        | "娱乐" | "K歌" | "听书" | "音频" | "动漫" => Category::Entertainment,
        "网上购物" | "购物" | "电商" | "团购" | "优惠" | "比价" => Category::Shopping,
        "移动支付" | "支付" | "银行" | "理财" | "基金" | "股票" | "炒股" | "借贷" | "保险"
        | "记账" | "其他基金" => Category::Finance,
        "地图导航" | "出行" | "旅游" | "公交" | "打车" | "住宿" | "航班" | "火车" | "导航"
        | "酒店" | "租车" => Category::Travel,
        "外卖" | "美食" | "菜谱" | "餐饮" => Category::FoodDelivery,
        "生活" | "健康" | "运动健康" | "健身" | "医疗" | "快递" | "房产" | "家政" | "缴费"
        | "便民" | "生活服务" => Category::LifeServices,
        "天气" | "实用工具" | "工具" | "系统" | "安全" | "输入法" | "效率" | "办公"
        | "文件管理" | "桌面" | "WIFI" | "wifi" => Category::SystemTools,
        "教育" | "学习" | "翻译" | "考试" | "词典" | "外语" | "儿童" => Category::Learning,
        "拍摄美化" | "美化" | "拍照" | "相机" | "图片编辑" | "壁纸" => Category::MediaTools,
        "浏览器" => Category::Browser,
        "智能硬件" | "智能家居" | "物联网" => Category::SmartHome,
        "角色扮演" | "动作冒险" | "策略" | "休闲益智" | "棋牌" | "竞速" | "射击" | "体育"
        | "模拟" | "经营" | "卡牌" | "创新品类" | "游戏社区" | "MMORPG" | "ARPG" | "回合制"
        | "塔防" | "音乐游戏" => Category::Games,
        _ => return None,
    };
    Some(category)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_keys_normalize() {
        assert_eq!(store_category("TOOLS"), Some(Category::SystemTools));
        assert_eq!(store_category("GAME_PUZZLE"), Some(Category::Games));
        assert_eq!(store_category("Art & Design"), Some(Category::MediaTools));
        assert_eq!(store_category("FAMILY"), None);
    }

    #[test]
    fn domestic_tags() {
        assert_eq!(domestic_tag(" 好友社交 "), Some(Category::Social));
        assert_eq!(domestic_tag("天气"), Some(Category::SystemTools));
        assert_eq!(domestic_tag("塔防"), Some(Category::Games));
        assert_eq!(domestic_tag("未知标签"), None);
    }
}
