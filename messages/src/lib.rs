//! Node-to-node wire messages.
//!
//! Every message is an 8-byte header followed by a fixed-layout body;
//! multi-byte integers are big-endian unless a field is documented
//! little-endian. Parsing never allocates unbounded memory: counts come
//! from bounded header bits or explicit caps.

pub mod header;

pub use header::{MessageHeader, MessageType, HEADER_SIZE};

use lattice_types::{
    Account, Amount, Block, BlockHash, BlockType, Reader, Root, Signature, Vote, VotePayload,
    MAX_VOTE_HASHES,
};
use lattice_types::params::NetworkConstants;
use std::net::{Ipv6Addr, SocketAddrV6};
use thiserror::Error;

/// Datagrams above this size are dropped before parsing.
pub const MAX_SAFE_UDP_SIZE: usize = 508;

/// Peer sample slots in a keepalive.
pub const KEEPALIVE_PEER_COUNT: usize = 8;

/// Why an incoming buffer failed to parse. Each maps to a stat counter; the
/// peer gets no response.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("header truncated or malformed")]
    InvalidHeader,
    #[error("magic bytes do not match this network")]
    InvalidMagic,
    #[error("peer protocol version is too old")]
    OutdatedVersion,
    #[error("unknown message type")]
    InvalidMessageType,
    #[error("malformed keepalive body")]
    InvalidKeepalive,
    #[error("malformed publish body")]
    InvalidPublish,
    #[error("malformed confirm_req body")]
    InvalidConfirmReq,
    #[error("malformed confirm_ack body")]
    InvalidConfirmAck,
    #[error("malformed bulk_pull body")]
    InvalidBulkPull,
    #[error("malformed bulk_pull_account body")]
    InvalidBulkPullAccount,
    #[error("malformed frontier_req body")]
    InvalidFrontierReq,
    #[error("malformed node_id_handshake body")]
    InvalidNodeIdHandshake,
    #[error("message exceeds the safe datagram size")]
    OversizedMessage,
}

/// Eight peer endpoints sampled from the sender's peer table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Keepalive {
    pub peers: [SocketAddrV6; KEEPALIVE_PEER_COUNT],
}

impl Default for Keepalive {
    fn default() -> Self {
        Self {
            peers: [SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, 0, 0, 0); KEEPALIVE_PEER_COUNT],
        }
    }
}

/// A block flooded to the network.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Publish {
    pub block: Block,
}

/// A request for votes: one block, or up to 12 `(hash, root)` pairs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfirmReq {
    Block(Block),
    Roots(Vec<(BlockHash, Root)>),
}

/// A representative's vote.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfirmAck {
    pub vote: Vote,
}

/// Request a chain segment: from `end` (exclusive) back toward `start`,
/// where `start` names an account or a block hash.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BulkPull {
    pub start: [u8; 32],
    pub end: BlockHash,
    pub count: Option<u64>,
}

/// Request the pending entries of an account.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BulkPullAccount {
    pub account: Account,
    pub minimum_amount: Amount,
    pub flags: u8,
}

/// Request account frontiers at or after `start`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrontierReq {
    pub start: Account,
    pub age: u32,
    pub count: u32,
}

/// Cookie challenge and/or signed response proving node identity.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct NodeIdHandshake {
    pub query: Option<[u8; 32]>,
    pub response: Option<(Account, Signature)>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    Keepalive(Keepalive),
    Publish(Publish),
    ConfirmReq(ConfirmReq),
    ConfirmAck(ConfirmAck),
    BulkPull(BulkPull),
    BulkPush,
    FrontierReq(FrontierReq),
    NodeIdHandshake(NodeIdHandshake),
    BulkPullAccount(BulkPullAccount),
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Keepalive(_) => MessageType::Keepalive,
            Message::Publish(_) => MessageType::Publish,
            Message::ConfirmReq(_) => MessageType::ConfirmReq,
            Message::ConfirmAck(_) => MessageType::ConfirmAck,
            Message::BulkPull(_) => MessageType::BulkPull,
            Message::BulkPush => MessageType::BulkPush,
            Message::FrontierReq(_) => MessageType::FrontierReq,
            Message::NodeIdHandshake(_) => MessageType::NodeIdHandshake,
            Message::BulkPullAccount(_) => MessageType::BulkPullAccount,
        }
    }

    /// Header plus body bytes, ready to send.
    pub fn serialize(&self, constants: &NetworkConstants) -> Vec<u8> {
        let mut header = MessageHeader::new(constants, self.message_type());
        match self {
            Message::Publish(publish) => header.set_block_type(publish.block.block_type()),
            Message::ConfirmReq(ConfirmReq::Block(block)) => {
                header.set_block_type(block.block_type())
            }
            Message::ConfirmReq(ConfirmReq::Roots(roots)) => {
                header.set_block_type(BlockType::NotABlock);
                header.set_count(roots.len());
            }
            Message::ConfirmAck(ack) => match &ack.vote.payload {
                VotePayload::Block(block) => header.set_block_type(block.block_type()),
                VotePayload::Hashes(hashes) => {
                    header.set_block_type(BlockType::NotABlock);
                    header.set_count(hashes.len());
                }
            },
            Message::BulkPull(pull) => header.set_bulk_pull_count_present(pull.count.is_some()),
            Message::NodeIdHandshake(handshake) => {
                header.set_handshake_flags(handshake.query.is_some(), handshake.response.is_some())
            }
            _ => {}
        }

        let mut out = Vec::new();
        out.extend_from_slice(&header.serialize());
        match self {
            Message::Keepalive(keepalive) => {
                for peer in &keepalive.peers {
                    out.extend_from_slice(&peer.ip().octets());
                    out.extend_from_slice(&peer.port().to_be_bytes());
                }
            }
            Message::Publish(publish) => out.extend_from_slice(&publish.block.serialize()),
            Message::ConfirmReq(ConfirmReq::Block(block)) => {
                out.extend_from_slice(&block.serialize())
            }
            Message::ConfirmReq(ConfirmReq::Roots(roots)) => {
                for (hash, root) in roots {
                    out.extend_from_slice(hash.as_bytes());
                    out.extend_from_slice(root.as_bytes());
                }
            }
            Message::ConfirmAck(ack) => out.extend_from_slice(&ack.vote.serialize()),
            Message::BulkPull(pull) => {
                out.extend_from_slice(&pull.start);
                out.extend_from_slice(pull.end.as_bytes());
                if let Some(count) = pull.count {
                    out.extend_from_slice(&count.to_le_bytes());
                }
            }
            Message::BulkPush => {}
            Message::FrontierReq(req) => {
                out.extend_from_slice(req.start.as_bytes());
                out.extend_from_slice(&req.age.to_le_bytes());
                out.extend_from_slice(&req.count.to_le_bytes());
            }
            Message::NodeIdHandshake(handshake) => {
                if let Some(cookie) = &handshake.query {
                    out.extend_from_slice(cookie);
                }
                if let Some((account, signature)) = &handshake.response {
                    out.extend_from_slice(account.as_bytes());
                    out.extend_from_slice(signature.as_bytes());
                }
            }
            Message::BulkPullAccount(pull) => {
                out.extend_from_slice(pull.account.as_bytes());
                out.extend_from_slice(&pull.minimum_amount.to_be_bytes());
                out.push(pull.flags);
            }
        }
        out
    }

    /// Parse a whole datagram: header, then the body its header promises.
    pub fn deserialize(bytes: &[u8], constants: &NetworkConstants) -> Result<Message, ParseError> {
        if bytes.len() > MAX_SAFE_UDP_SIZE {
            return Err(ParseError::OversizedMessage);
        }
        let mut reader = Reader::new(bytes);
        let header = MessageHeader::deserialize(&mut reader, constants)?;
        Self::deserialize_body(&header, &mut reader)
    }

    /// Parse a body whose header was already read (TCP framing path).
    pub fn deserialize_body(
        header: &MessageHeader,
        reader: &mut Reader<'_>,
    ) -> Result<Message, ParseError> {
        match header.message_type {
            MessageType::Keepalive => {
                let mut keepalive = Keepalive::default();
                for slot in keepalive.peers.iter_mut() {
                    let octets: [u8; 16] = reader
                        .take(16)
                        .map_err(|_| ParseError::InvalidKeepalive)?
                        .try_into()
                        .map_err(|_| ParseError::InvalidKeepalive)?;
                    let port = reader.u16_be().map_err(|_| ParseError::InvalidKeepalive)?;
                    *slot = SocketAddrV6::new(Ipv6Addr::from(octets), port, 0, 0);
                }
                Ok(Message::Keepalive(keepalive))
            }
            MessageType::Publish => {
                let block_type = header.block_type().ok_or(ParseError::InvalidPublish)?;
                let block = Block::deserialize(block_type, reader)
                    .map_err(|_| ParseError::InvalidPublish)?;
                Ok(Message::Publish(Publish { block }))
            }
            MessageType::ConfirmReq => {
                let block_type = header.block_type().ok_or(ParseError::InvalidConfirmReq)?;
                if block_type == BlockType::NotABlock {
                    let count = header.count();
                    if count == 0 || count > MAX_VOTE_HASHES {
                        return Err(ParseError::InvalidConfirmReq);
                    }
                    let mut roots = Vec::with_capacity(count);
                    for _ in 0..count {
                        let hash = BlockHash::new(
                            reader.bytes_32().map_err(|_| ParseError::InvalidConfirmReq)?,
                        );
                        let root = Root::new(
                            reader.bytes_32().map_err(|_| ParseError::InvalidConfirmReq)?,
                        );
                        roots.push((hash, root));
                    }
                    Ok(Message::ConfirmReq(ConfirmReq::Roots(roots)))
                } else {
                    let block = Block::deserialize(block_type, reader)
                        .map_err(|_| ParseError::InvalidConfirmReq)?;
                    Ok(Message::ConfirmReq(ConfirmReq::Block(block)))
                }
            }
            MessageType::ConfirmAck => {
                let block_type = header.block_type().ok_or(ParseError::InvalidConfirmAck)?;
                let vote = Vote::deserialize(reader, block_type, header.count())
                    .map_err(|_| ParseError::InvalidConfirmAck)?;
                Ok(Message::ConfirmAck(ConfirmAck { vote }))
            }
            MessageType::BulkPull => {
                let start = reader.bytes_32().map_err(|_| ParseError::InvalidBulkPull)?;
                let end =
                    BlockHash::new(reader.bytes_32().map_err(|_| ParseError::InvalidBulkPull)?);
                let count = if header.bulk_pull_count_present() {
                    Some(reader.u64_le().map_err(|_| ParseError::InvalidBulkPull)?)
                } else {
                    None
                };
                Ok(Message::BulkPull(BulkPull { start, end, count }))
            }
            MessageType::BulkPush => Ok(Message::BulkPush),
            MessageType::FrontierReq => {
                let start = Account::new(
                    reader.bytes_32().map_err(|_| ParseError::InvalidFrontierReq)?,
                );
                let age = reader.u32_le().map_err(|_| ParseError::InvalidFrontierReq)?;
                let count = reader.u32_le().map_err(|_| ParseError::InvalidFrontierReq)?;
                Ok(Message::FrontierReq(FrontierReq { start, age, count }))
            }
            MessageType::NodeIdHandshake => {
                let mut handshake = NodeIdHandshake::default();
                if header.handshake_query() {
                    handshake.query = Some(
                        reader
                            .bytes_32()
                            .map_err(|_| ParseError::InvalidNodeIdHandshake)?,
                    );
                }
                if header.handshake_response() {
                    let account = Account::new(
                        reader
                            .bytes_32()
                            .map_err(|_| ParseError::InvalidNodeIdHandshake)?,
                    );
                    let signature = Signature(
                        reader
                            .bytes_64()
                            .map_err(|_| ParseError::InvalidNodeIdHandshake)?,
                    );
                    handshake.response = Some((account, signature));
                }
                if handshake.query.is_none() && handshake.response.is_none() {
                    return Err(ParseError::InvalidNodeIdHandshake);
                }
                Ok(Message::NodeIdHandshake(handshake))
            }
            MessageType::BulkPullAccount => {
                let account = Account::new(
                    reader
                        .bytes_32()
                        .map_err(|_| ParseError::InvalidBulkPullAccount)?,
                );
                let minimum_amount = Amount::from_be_bytes(
                    reader
                        .take(16)
                        .map_err(|_| ParseError::InvalidBulkPullAccount)?
                        .try_into()
                        .map_err(|_| ParseError::InvalidBulkPullAccount)?,
                );
                let flags = reader.u8().map_err(|_| ParseError::InvalidBulkPullAccount)?;
                Ok(Message::BulkPullAccount(BulkPullAccount {
                    account,
                    minimum_amount,
                    flags,
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_types::{Network, NetworkParams, SendBlock, StateBlock, Link};

    fn constants() -> NetworkConstants {
        NetworkParams::new(Network::Test).network
    }

    fn round_trip(message: Message) -> Message {
        let constants = constants();
        let bytes = message.serialize(&constants);
        let decoded = Message::deserialize(&bytes, &constants).unwrap();
        assert_eq!(decoded, message);
        decoded
    }

    fn sample_block() -> Block {
        Block::Send(SendBlock {
            previous: BlockHash::new([1; 32]),
            destination: Account::new([2; 32]),
            balance: Amount::raw(7),
            signature: Signature([3; 64]),
            work: 42,
        })
    }

    #[test]
    fn keepalive_round_trip_and_size() {
        let mut keepalive = Keepalive::default();
        keepalive.peers[0] = SocketAddrV6::new(Ipv6Addr::LOCALHOST, 7075, 0, 0);
        let bytes = Message::Keepalive(keepalive.clone()).serialize(&constants());
        assert_eq!(bytes.len(), HEADER_SIZE + 8 * 18);
        round_trip(Message::Keepalive(keepalive));
    }

    #[test]
    fn publish_round_trip() {
        round_trip(Message::Publish(Publish {
            block: sample_block(),
        }));

        let state = Block::State(StateBlock {
            account: Account::new([1; 32]),
            previous: BlockHash::new([2; 32]),
            representative: Account::new([3; 32]),
            balance: Amount::raw(11),
            link: Link::new([4; 32]),
            signature: Signature([5; 64]),
            work: 6,
        });
        round_trip(Message::Publish(Publish { block: state }));
    }

    #[test]
    fn confirm_req_by_roots_round_trip() {
        let roots = (0..7u8)
            .map(|i| (BlockHash::new([i; 32]), Root::new([i + 1; 32])))
            .collect::<Vec<_>>();
        round_trip(Message::ConfirmReq(ConfirmReq::Roots(roots)));
        round_trip(Message::ConfirmReq(ConfirmReq::Block(sample_block())));
    }

    #[test]
    fn confirm_ack_twelve_hashes_exact_size() {
        let hashes: Vec<BlockHash> = (0..12u8).map(|i| BlockHash::new([i; 32])).collect();
        let vote = Vote::new_hashes(Account::new([9; 32]), 3, hashes).unwrap();
        let message = Message::ConfirmAck(ConfirmAck { vote });
        let bytes = message.serialize(&constants());
        // header + account + signature + sequence + 12 hashes
        assert_eq!(bytes.len(), HEADER_SIZE + 32 + 64 + 8 + 12 * 32);
        round_trip(message);
    }

    #[test]
    fn confirm_ack_with_block_round_trip() {
        let vote = Vote::new_block(Account::new([9; 32]), 3, sample_block());
        round_trip(Message::ConfirmAck(ConfirmAck { vote }));
    }

    #[test]
    fn bulk_pull_optional_count() {
        round_trip(Message::BulkPull(BulkPull {
            start: [1; 32],
            end: BlockHash::ZERO,
            count: None,
        }));
        round_trip(Message::BulkPull(BulkPull {
            start: [1; 32],
            end: BlockHash::new([2; 32]),
            count: Some(128),
        }));
    }

    #[test]
    fn frontier_req_round_trip() {
        round_trip(Message::FrontierReq(FrontierReq {
            start: Account::new([1; 32]),
            age: u32::MAX,
            count: 1000,
        }));
    }

    #[test]
    fn handshake_variants_round_trip() {
        round_trip(Message::NodeIdHandshake(NodeIdHandshake {
            query: Some([7; 32]),
            response: None,
        }));
        round_trip(Message::NodeIdHandshake(NodeIdHandshake {
            query: None,
            response: Some((Account::new([1; 32]), Signature([2; 64]))),
        }));
        round_trip(Message::NodeIdHandshake(NodeIdHandshake {
            query: Some([7; 32]),
            response: Some((Account::new([1; 32]), Signature([2; 64]))),
        }));
    }

    #[test]
    fn bulk_pull_account_round_trip() {
        round_trip(Message::BulkPullAccount(BulkPullAccount {
            account: Account::new([1; 32]),
            minimum_amount: Amount::raw(10),
            flags: 1,
        }));
        round_trip(Message::BulkPush);
    }

    #[test]
    fn oversized_datagram_rejected() {
        let constants = constants();
        let bytes = vec![0u8; MAX_SAFE_UDP_SIZE + 1];
        assert_eq!(
            Message::deserialize(&bytes, &constants),
            Err(ParseError::OversizedMessage)
        );
    }

    #[test]
    fn truncated_bodies_rejected() {
        let constants = constants();
        let full = Message::Publish(Publish {
            block: sample_block(),
        })
        .serialize(&constants);
        for cut in [full.len() - 1, HEADER_SIZE + 3, HEADER_SIZE] {
            assert!(Message::deserialize(&full[..cut], &constants).is_err());
        }
    }

    #[test]
    fn confirm_req_count_out_of_range_rejected() {
        let constants = constants();
        let mut header = MessageHeader::new(&constants, MessageType::ConfirmReq);
        header.set_block_type(BlockType::NotABlock);
        header.set_count(0);
        let bytes = header.serialize();
        assert_eq!(
            Message::deserialize(&bytes, &constants),
            Err(ParseError::InvalidConfirmReq)
        );
    }
}
