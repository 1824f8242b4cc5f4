//! Turning raw message sets into flat record sequences.

use engine_core::{ConsumerRecord, Deserializer, Error, Result, TopicPartition};
use protocol::MessageSetEntry;
use std::collections::VecDeque;

/// Flatten a message set into consumer records.
///
/// Compression containers are unpacked recursively to arbitrary depth.
/// With `check_crcs` set, any entry whose stored CRC disagrees with a
/// recomputation fails the whole partition with [`Error::CorruptMessage`].
/// Deserializers are applied to every non-null key and value.
pub fn unpack_message_set(
    tp: &TopicPartition,
    entries: &[MessageSetEntry],
    check_crcs: bool,
    key_deserializer: Option<&Deserializer>,
    value_deserializer: Option<&Deserializer>,
) -> Result<VecDeque<ConsumerRecord>> {
    let mut records = VecDeque::new();
    unpack_into(
        tp,
        entries,
        check_crcs,
        key_deserializer,
        value_deserializer,
        &mut records,
    )?;
    Ok(records)
}

fn unpack_into(
    tp: &TopicPartition,
    entries: &[MessageSetEntry],
    check_crcs: bool,
    key_deserializer: Option<&Deserializer>,
    value_deserializer: Option<&Deserializer>,
    records: &mut VecDeque<ConsumerRecord>,
) -> Result<()> {
    for entry in entries {
        let message = &entry.message;
        if check_crcs && !message.validate_crc() {
            return Err(Error::CorruptMessage {
                tp: tp.clone(),
                offset: entry.offset,
            });
        }
        if message.is_compressed() {
            let nested = message.decompress()?;
            if nested.partial.is_some() {
                return Err(Error::codec("truncated message set inside a compression container"));
            }
            unpack_into(
                tp,
                &nested.entries,
                check_crcs,
                key_deserializer,
                value_deserializer,
                records,
            )?;
        } else {
            let key = match (&message.key, key_deserializer) {
                (Some(key), Some(de)) => Some(de(key.clone())),
                (Some(key), None) => Some(key.clone()),
                (None, _) => None,
            };
            let value = match (&message.value, value_deserializer) {
                (Some(value), Some(de)) => Some(de(value.clone())),
                (Some(value), None) => Some(value.clone()),
                (None, _) => None,
            };
            records.push_back(ConsumerRecord {
                topic: tp.topic.clone(),
                partition: tp.partition,
                offset: entry.offset,
                key,
                value,
            });
        }
    }
    Ok(())
}
