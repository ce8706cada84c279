//! Canonical on-chain event model.
//!
//! The story contracts have shipped several revisions of their events:
//! `PlayerChoice` with and without a node index or story game id, and
//! `StoryGameCreated` with and without a story game id, sometimes with the
//! leading address arguments indexed. Logs are normalized into one internal
//! event type here, before dispatch, so the handlers never see the
//! differences. Missing optional fields become `None`; anything else
//! malformed is a [`DecodeError`].

use ethrpc::abi::{self, ParamType, Token};
use ethrpc::{Address, Log, H256};
use once_cell::sync::Lazy;

use crate::error::DecodeError;

/// Identity of a delivered log, used to skip duplicate delivery after
/// reconnects or reorg replays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventKey {
    pub transaction_hash: H256,
    pub log_index: u64,
}

impl EventKey {
    /// The key for a log, if the node attached enough metadata to build one.
    pub fn of(log: &Log) -> Option<EventKey> {
        Some(EventKey {
            transaction_hash: log.transaction_hash?,
            log_index: log.log_index?,
        })
    }
}

/// A player picked a branch in a story game.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerChoice {
    pub player: Address,
    pub choice: u64,
    pub node_index: Option<u64>,
    pub story_game_id: Option<u64>,
}

/// A new story game contract was deployed through the factory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoryGameCreated {
    pub owner: Address,
    pub story_game: Address,
    pub title: String,
    pub story_game_id: Option<u64>,
}

/// The canonical event type handlers dispatch on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoryEvent {
    PlayerChoice(PlayerChoice),
    StoryGameCreated(StoryGameCreated),
}

impl StoryEvent {
    pub fn name(&self) -> &'static str {
        match self {
            StoryEvent::PlayerChoice(_) => "PlayerChoice",
            StoryEvent::StoryGameCreated(_) => "StoryGameCreated",
        }
    }
}

static PLAYER_CHOICE_V1: Lazy<H256> = Lazy::new(|| abi::event_topic("PlayerChoice(address,uint256)"));
static PLAYER_CHOICE_V2: Lazy<H256> =
    Lazy::new(|| abi::event_topic("PlayerChoice(address,uint256,uint256)"));
static PLAYER_CHOICE_V3: Lazy<H256> =
    Lazy::new(|| abi::event_topic("PlayerChoice(address,uint256,uint256,uint256)"));
static STORY_GAME_CREATED_V1: Lazy<H256> =
    Lazy::new(|| abi::event_topic("StoryGameCreated(address,address,string)"));
static STORY_GAME_CREATED_V2: Lazy<H256> =
    Lazy::new(|| abi::event_topic("StoryGameCreated(address,address,string,uint256)"));

/// Normalize a raw log into a [`StoryEvent`].
pub fn decode(log: &Log) -> Result<StoryEvent, DecodeError> {
    let topic0 = log.topics.first().ok_or(DecodeError::MissingTopic)?;

    if *topic0 == *PLAYER_CHOICE_V1 {
        decode_player_choice(log, 0)
    } else if *topic0 == *PLAYER_CHOICE_V2 {
        decode_player_choice(log, 1)
    } else if *topic0 == *PLAYER_CHOICE_V3 {
        decode_player_choice(log, 2)
    } else if *topic0 == *STORY_GAME_CREATED_V1 {
        decode_story_game_created(log, false)
    } else if *topic0 == *STORY_GAME_CREATED_V2 {
        decode_story_game_created(log, true)
    } else {
        Err(DecodeError::UnknownEvent(*topic0))
    }
}

/// `extra_uints` counts the uint arguments after `choice`: zero for the
/// earliest revision, one for `storyGameId`, two for `nodeIndex` +
/// `storyGameId`.
fn decode_player_choice(log: &Log, extra_uints: usize) -> Result<StoryEvent, DecodeError> {
    const EVENT: &str = "PlayerChoice";

    let (mut addresses, words) = split_log(log, 1, 1 + extra_uints, EVENT)?;
    let player = addresses.pop().ok_or(DecodeError::MissingField {
        event: EVENT,
        field: "player",
    })?;

    let mut uints = words.into_iter();
    let choice = uint_field(uints.next(), EVENT, "choice")?;
    let (node_index, story_game_id) = match extra_uints {
        0 => (None, None),
        1 => (None, Some(uint_field(uints.next(), EVENT, "storyGameId")?)),
        _ => (
            Some(uint_field(uints.next(), EVENT, "nodeIndex")?),
            Some(uint_field(uints.next(), EVENT, "storyGameId")?),
        ),
    };

    Ok(StoryEvent::PlayerChoice(PlayerChoice {
        player,
        choice,
        node_index,
        story_game_id,
    }))
}

fn decode_story_game_created(log: &Log, has_id: bool) -> Result<StoryEvent, DecodeError> {
    const EVENT: &str = "StoryGameCreated";

    let mut tail = vec![ParamType::String];
    if has_id {
        tail.push(ParamType::Uint);
    }
    let (addresses, tokens) = split_log_with_tail(log, 2, &tail, EVENT)?;
    let (owner, story_game) = match addresses[..] {
        [owner, story_game] => (owner, story_game),
        _ => {
            return Err(DecodeError::MissingField {
                event: EVENT,
                field: "storyGameAddress",
            })
        }
    };

    let mut tokens = tokens.into_iter();
    let title = tokens
        .next()
        .and_then(Token::into_string)
        .ok_or(DecodeError::MissingField {
            event: EVENT,
            field: "storyTitle",
        })?;
    let story_game_id = if has_id {
        Some(uint_field(tokens.next(), EVENT, "storyGameId")?)
    } else {
        None
    };

    Ok(StoryEvent::StoryGameCreated(StoryGameCreated {
        owner,
        story_game,
        title,
        story_game_id,
    }))
}

/// Pull `addr_params` leading addresses (from topics where indexed, from
/// data otherwise) followed by `uint_params` uints out of a log.
fn split_log(
    log: &Log,
    addr_params: usize,
    uint_params: usize,
    event: &'static str,
) -> Result<(Vec<Address>, Vec<Token>), DecodeError> {
    let tail = vec![ParamType::Uint; uint_params];
    split_log_with_tail(log, addr_params, &tail, event)
}

fn split_log_with_tail(
    log: &Log,
    addr_params: usize,
    tail: &[ParamType],
    event: &'static str,
) -> Result<(Vec<Address>, Vec<Token>), DecodeError> {
    let indexed = (log.topics.len() - 1).min(addr_params);

    let mut addresses: Vec<Address> = log.topics[1..1 + indexed]
        .iter()
        .map(|topic| Address::from_word(&topic.0))
        .collect();

    let mut types = vec![ParamType::Address; addr_params - indexed];
    types.extend_from_slice(tail);
    let mut tokens = abi::decode(&log.data, &types)
        .map_err(|e| DecodeError::Payload {
            event,
            reason: e.to_string(),
        })?
        .into_iter();

    for _ in 0..addr_params - indexed {
        let address = tokens.next().and_then(|t| t.as_address()).ok_or(
            DecodeError::Payload {
                event,
                reason: "expected address argument".to_string(),
            },
        )?;
        addresses.push(address);
    }

    Ok((addresses, tokens.collect()))
}

fn uint_field(
    token: Option<Token>,
    event: &'static str,
    field: &'static str,
) -> Result<u64, DecodeError> {
    let token = token.ok_or(DecodeError::MissingField { event, field })?;
    token.as_u64().ok_or(DecodeError::Payload {
        event,
        reason: format!("{field} does not fit in 64 bits"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethrpc::U256;

    fn factory() -> Address {
        "0x5fbdb2315678afecb367f032d93f642f64180aa3".parse().unwrap()
    }

    fn player() -> Address {
        "0x70997970c51812dc3a010c7d01b50e0d17dc79c8".parse().unwrap()
    }

    fn game() -> Address {
        "0xe7f1725e7734ce288f8367e1bb143e90bb3f0512".parse().unwrap()
    }

    fn log_with(topics: Vec<H256>, data: Vec<u8>) -> Log {
        serde_json::from_value(serde_json::json!({
            "address": factory().to_string(),
            "topics": topics.iter().map(|t| t.to_string()).collect::<Vec<_>>(),
            "data": format!("0x{}", hex::encode(data)),
        }))
        .unwrap()
    }

    #[test]
    fn test_decode_player_choice_all_fields() {
        let data = abi::encode(&[
            Token::Address(player()),
            Token::Uint(U256::from(2)),
            Token::Uint(U256::from(5)),
            Token::Uint(U256::from(1)),
        ]);
        let event = decode(&log_with(vec![*PLAYER_CHOICE_V3], data)).unwrap();
        assert_eq!(
            event,
            StoryEvent::PlayerChoice(PlayerChoice {
                player: player(),
                choice: 2,
                node_index: Some(5),
                story_game_id: Some(1),
            })
        );
    }

    #[test]
    fn test_decode_player_choice_without_node_index() {
        let data = abi::encode(&[
            Token::Address(player()),
            Token::Uint(U256::from(1)),
            Token::Uint(U256::from(0)),
        ]);
        let event = decode(&log_with(vec![*PLAYER_CHOICE_V2], data)).unwrap();
        let StoryEvent::PlayerChoice(choice) = event else {
            panic!("wrong variant");
        };
        assert_eq!(choice.node_index, None);
        assert_eq!(choice.story_game_id, Some(0));
    }

    #[test]
    fn test_decode_player_choice_indexed_player() {
        let mut player_topic = [0u8; 32];
        player_topic[12..].copy_from_slice(&player().0);
        let data = abi::encode(&[Token::Uint(U256::from(3)), Token::Uint(U256::from(7))]);
        let event = decode(&log_with(vec![*PLAYER_CHOICE_V2, H256(player_topic)], data)).unwrap();
        let StoryEvent::PlayerChoice(choice) = event else {
            panic!("wrong variant");
        };
        assert_eq!(choice.player, player());
        assert_eq!(choice.choice, 3);
        assert_eq!(choice.story_game_id, Some(7));
    }

    #[test]
    fn test_decode_story_game_created() {
        let data = abi::encode(&[
            Token::Address(factory()),
            Token::Address(game()),
            Token::String("Found a treasure".to_string()),
        ]);
        let event = decode(&log_with(vec![*STORY_GAME_CREATED_V1], data)).unwrap();
        assert_eq!(
            event,
            StoryEvent::StoryGameCreated(StoryGameCreated {
                owner: factory(),
                story_game: game(),
                title: "Found a treasure".to_string(),
                story_game_id: None,
            })
        );
    }

    #[test]
    fn test_decode_story_game_created_with_id_and_indexed_owner() {
        let mut owner_topic = [0u8; 32];
        owner_topic[12..].copy_from_slice(&player().0);
        let data = abi::encode(&[
            Token::Address(game()),
            Token::String("The Hollow Crown".to_string()),
            Token::Uint(U256::from(4)),
        ]);
        let event =
            decode(&log_with(vec![*STORY_GAME_CREATED_V2, H256(owner_topic)], data)).unwrap();
        let StoryEvent::StoryGameCreated(created) = event else {
            panic!("wrong variant");
        };
        assert_eq!(created.owner, player());
        assert_eq!(created.story_game, game());
        assert_eq!(created.story_game_id, Some(4));
    }

    #[test]
    fn test_unknown_topic_is_rejected() {
        let bogus = abi::event_topic("Transfer(address,address,uint256)");
        let err = decode(&log_with(vec![bogus], Vec::new())).unwrap_err();
        assert!(matches!(err, DecodeError::UnknownEvent(_)));
    }

    #[test]
    fn test_log_without_topics_is_rejected() {
        let err = decode(&log_with(Vec::new(), Vec::new())).unwrap_err();
        assert!(matches!(err, DecodeError::MissingTopic));
    }

    #[test]
    fn test_oversized_choice_is_rejected() {
        let mut huge = [0u8; 32];
        huge[0] = 0xff;
        let data = abi::encode(&[
            Token::Address(player()),
            Token::Uint(U256(huge)),
            Token::Uint(U256::from(0)),
        ]);
        let err = decode(&log_with(vec![*PLAYER_CHOICE_V2], data)).unwrap_err();
        assert!(matches!(err, DecodeError::Payload { .. }));
    }

    #[test]
    fn test_truncated_payload_is_rejected() {
        let data = abi::encode(&[Token::Address(player())]);
        let err = decode(&log_with(vec![*PLAYER_CHOICE_V2], data)).unwrap_err();
        assert!(matches!(err, DecodeError::Payload { .. }));
    }

    #[test]
    fn test_event_key_requires_metadata() {
        let log = log_with(vec![*PLAYER_CHOICE_V1], Vec::new());
        assert!(EventKey::of(&log).is_none());
    }
}
