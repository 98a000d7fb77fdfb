//! Well-known category and action names.

/// Routing categories.
pub mod category {
    pub const AUTH: &str = "auth";
    pub const HEARTBEAT: &str = "heartbeat";
    pub const PLAYER: &str = "player";
    pub const EQUIP: &str = "equip";
    pub const FRIEND: &str = "friend";
    pub const RANK: &str = "rank";
}

/// Actions within a category.
pub mod action {
    // auth
    pub const LOGIN: &str = "login";
    pub const REGISTER: &str = "register";
    pub const LOGOUT: &str = "logout";

    // heartbeat
    pub const PING: &str = "ping";

    // player
    pub const GET_INFO: &str = "getInfo";
    pub const UPDATE: &str = "update";

    // equip
    pub const GET_EQUIP: &str = "getEquip";
    pub const SAVE_EQUIP: &str = "saveEquip";
    pub const DELETE_EQUIP: &str = "deleteEquip";

    // friend
    pub const GET_FRIENDS: &str = "getFriends";
    pub const ADD_FRIEND: &str = "addFriend";
    pub const REMOVE_FRIEND: &str = "removeFriend";
    pub const ACCEPT_FRIEND: &str = "acceptFriend";
    pub const REJECT_FRIEND: &str = "rejectFriend";

    // rank
    pub const GET_ALL_RANK: &str = "getAllRank";
    pub const GET_RANK: &str = "getRank";
}
