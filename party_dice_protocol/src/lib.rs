// party_dice_protocol: wire protocol for the Party Dice session coordinator.
//
// Shared by the coordinator (`party_dice_coordinator`) and its clients. Has no
// dependency on coordinator state.
//
// Module overview:
// - `types.rs`:    `AccountCode`, `LobbyCode`, `RequestId`, `DiceTier`,
//                  `BonusTier`.
// - `message.rs`:  `ClientMessage`/`Request` upstream, `ServerMessage`/`Reply`
//                  downstream, plus `LobbySnapshot` and `MinigameEntry`.
// - `framing.rs`:  4-byte big-endian length prefix + JSON payload over any
//                  `Read`/`Write` stream.
//
// JSON keeps frames readable in packet captures and matches the serde_json
// use on both sides. No async runtime: framing is plain `std::io`.

pub mod framing;
pub mod message;
pub mod types;

pub use framing::{MAX_MESSAGE_SIZE, read_message, recv_frame, send_frame, write_message};
pub use message::{
    ClientMessage, LobbySnapshot, MemberInfo, MinigameEntry, Reply, Request, ServerMessage,
};
pub use types::{AccountCode, BonusTier, DiceTier, LobbyCode, RequestId};

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    #[test]
    fn codes_serialize_as_plain_strings() {
        let json = serde_json::to_string(&AccountCode::new("K3Z9Q")).unwrap();
        assert_eq!(json, r#""K3Z9Q""#);
    }

    #[test]
    fn account_codes_key_json_objects() {
        let mut colors = BTreeMap::new();
        colors.insert(AccountCode::new("AAAAA"), "red".to_string());
        let msg = ServerMessage::GameStarted {
            map: "forest".into(),
            turn_order: vec![AccountCode::new("AAAAA")],
            colors,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["GameStarted"]["colors"]["AAAAA"], "red");
        let back: ServerMessage = serde_json::from_value(json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn tiers_use_lowercase_names() {
        assert_eq!(serde_json::to_string(&DiceTier::Gold).unwrap(), r#""gold""#);
        assert_eq!(
            serde_json::to_string(&BonusTier::Bronze).unwrap(),
            r#""bronze""#
        );
    }

    #[test]
    fn unknown_tier_names_fall_back_to_normal() {
        assert_eq!(DiceTier::parse("gold"), DiceTier::Gold);
        assert_eq!(DiceTier::parse("silver"), DiceTier::Silver);
        assert_eq!(DiceTier::parse("bronze"), DiceTier::Bronze);
        assert_eq!(DiceTier::parse("normal"), DiceTier::Normal);
        assert_eq!(DiceTier::parse("platinum"), DiceTier::Normal);
        assert_eq!(DiceTier::parse(""), DiceTier::Normal);
    }

    #[test]
    fn tier_faces() {
        assert_eq!(DiceTier::Normal.faces(), (1, 6));
        assert_eq!(DiceTier::Gold.faces(), (4, 6));
        assert_eq!(DiceTier::Silver.faces(), (2, 4));
        assert_eq!(DiceTier::Bronze.faces(), (1, 3));
    }

    #[test]
    fn only_top_three_placements_earn_bonuses() {
        assert_eq!(BonusTier::for_placement(0), Some(BonusTier::Gold));
        assert_eq!(BonusTier::for_placement(1), Some(BonusTier::Silver));
        assert_eq!(BonusTier::for_placement(2), Some(BonusTier::Bronze));
        assert_eq!(BonusTier::for_placement(3), None);
    }

    #[test]
    fn minigame_rank_accepts_any_number() {
        let prefix = r#"{"SubmitMinigameResult":{"lobby_code":"ABCD","rank":"#;
        for (text, rank) in [("-1.5", -1.5), ("0.25", 0.25), ("3", 3.0)] {
            let json = format!("{prefix}{text}}}}}");
            let request: Request = serde_json::from_str(&json).unwrap();
            assert_eq!(
                request,
                Request::SubmitMinigameResult {
                    lobby_code: LobbyCode::new("ABCD"),
                    rank,
                }
            );
        }
    }

    #[test]
    fn login_without_code_decodes_from_null() {
        let json = r#"{"Request":{"id":1,"request":{"Login":{"code":null,"display_name":"Ada"}}}}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Request {
                id: RequestId(1),
                request: Request::Login {
                    code: None,
                    display_name: "Ada".into(),
                },
            }
        );
    }
}
