// BlockStream - in-process fan-out of new chain heads
// One websocket feed drives every scheduler that subscribes

use ethers::types::{Block, H256};
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Shared stream of chain heads.
pub struct BlockStream {
    sender: broadcast::Sender<BlockData>,
}

/// Head data carried by the stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockData {
    pub block_number: u64,
    pub block_hash: Option<H256>,
}

impl BlockStream {
    /// `capacity`: messages buffered per subscriber before the slowest one lags
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BlockData> {
        self.sender.subscribe()
    }

    /// Publishes a `newHeads` notification. Returns the number of subscribers reached.
    pub fn publish(&self, block: &Block<H256>) -> Result<usize, BlockStreamError> {
        let block_number = block
            .number
            .ok_or(BlockStreamError::InvalidBlock("Block number not available"))?
            .as_u64();
        Ok(self.publish_data(BlockData {
            block_number,
            block_hash: block.hash,
        }))
    }

    pub fn publish_number(&self, block_number: u64) -> usize {
        self.publish_data(BlockData {
            block_number,
            block_hash: None,
        })
    }

    fn publish_data(&self, data: BlockData) -> usize {
        let block_number = data.block_number;
        match self.sender.send(data) {
            Ok(count) => {
                debug!("[BlockStream] Published block {} to {} subscribers", block_number, count);
                count
            }
            Err(broadcast::error::SendError(_)) => {
                warn!("[BlockStream] Published block {} but no active subscribers", block_number);
                0
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BlockStreamError {
    #[error("Block is invalid: {0}")]
    InvalidBlock(&'static str),
}
