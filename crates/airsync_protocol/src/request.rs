//! Typed Sync request.
//!
//! Decoding walks the event stream with a dispatch loop per element:
//! peek the next start tag, handle it, and stop at the enclosing end tag.
//! Unknown elements are skipped whole.

use crate::change::ApplicationData;
use crate::error::{ProtocolError, ProtocolResult};
use crate::options::{
    BodyPreference, CollectionClass, CollectionOptions, ConflictPolicy, FilterType,
    SupportedFields,
};
use crate::version::{ProtocolVersion, VersionFeatures};
use airsync_codec::tags::{airsync, airsyncbase, rights_management};
use airsync_codec::{CodecResult, Event, EventReader, EventWriter, Tag};

/// A client operation inside a collection's Commands element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Create an item; the server assigns its id.
    Add {
        /// Client temporary id.
        client_id: String,
        /// Item class when it differs from the collection's.
        class: Option<CollectionClass>,
        /// Item payload.
        data: ApplicationData,
    },
    /// Modify an item.
    Modify {
        /// Server item id.
        server_id: String,
        /// Occurrence of a recurring item.
        instance_id: Option<String>,
        /// Changed properties.
        data: ApplicationData,
    },
    /// Remove an item, or one occurrence of it.
    Remove {
        /// Server item id.
        server_id: String,
        /// Occurrence of a recurring item.
        instance_id: Option<String>,
    },
    /// Request the full item.
    Fetch {
        /// Server item id.
        server_id: String,
    },
}

/// One Collection element of a Sync request.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CollectionRequest {
    /// Declared class.
    pub class: Option<CollectionClass>,
    /// Raw sync key as sent.
    pub sync_key: Option<String>,
    /// Backend folder id.
    pub id: String,
    /// Requested window, unclamped.
    pub window_size: Option<u32>,
    /// Conversation mode requested.
    pub conversation_mode: Option<bool>,
    /// Removals become moves to the waste basket.
    pub deletes_as_moves: Option<bool>,
    /// Server changes requested.
    pub get_changes: Option<bool>,
    /// Options sent with the request.
    pub options: Option<CollectionOptions>,
    /// Ghosting declaration.
    pub supported: Option<SupportedFields>,
    /// Client operations in request order.
    pub commands: Vec<Command>,
}

impl CollectionRequest {
    /// Creates a collection request with a sync key.
    pub fn new(id: impl Into<String>, sync_key: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            sync_key: Some(sync_key.into()),
            ..Default::default()
        }
    }

    /// Sets the class.
    pub fn with_class(mut self, class: CollectionClass) -> Self {
        self.class = Some(class);
        self
    }

    /// Sets the window size.
    pub fn with_window_size(mut self, window_size: u32) -> Self {
        self.window_size = Some(window_size);
        self
    }

    /// Sets the GetChanges flag.
    pub fn with_get_changes(mut self, get_changes: bool) -> Self {
        self.get_changes = Some(get_changes);
        self
    }

    /// Sets the DeletesAsMoves flag.
    pub fn with_deletes_as_moves(mut self, deletes_as_moves: bool) -> Self {
        self.deletes_as_moves = Some(deletes_as_moves);
        self
    }

    /// Sets the options.
    pub fn with_options(mut self, options: CollectionOptions) -> Self {
        self.options = Some(options);
        self
    }

    /// Sets the ghosting declaration.
    pub fn with_supported(mut self, supported: SupportedFields) -> Self {
        self.supported = Some(supported);
        self
    }

    /// Appends a command.
    pub fn with_command(mut self, command: Command) -> Self {
        self.commands.push(command);
        self
    }

    fn decode(reader: &mut EventReader, features: VersionFeatures) -> ProtocolResult<Self> {
        let mut collection = CollectionRequest::default();
        let mut id = None;
        loop {
            let Some(tag) = reader.peek_start() else {
                reader.end_tag()?;
                break;
            };
            let empty = reader.expect_start(tag)?;
            match tag {
                airsync::CLASS => {
                    collection.class = Some(CollectionClass::parse(&reader.element_text(empty)?)?);
                }
                airsync::SYNC_KEY => collection.sync_key = Some(reader.element_text(empty)?),
                airsync::COLLECTION_ID => id = Some(reader.element_text(empty)?),
                airsync::WINDOW_SIZE => {
                    let text = reader.element_text(empty)?;
                    collection.window_size = Some(parse_number("WindowSize", &text)?);
                }
                airsync::CONVERSATION_MODE if features.conversation_mode => {
                    collection.conversation_mode = Some(parse_flag(&reader.element_text(empty)?));
                }
                airsync::DELETES_AS_MOVES => {
                    collection.deletes_as_moves = Some(parse_flag(&reader.element_text(empty)?));
                }
                airsync::GET_CHANGES => {
                    collection.get_changes = Some(parse_flag(&reader.element_text(empty)?));
                }
                airsync::SUPPORTED => {
                    collection.supported = Some(decode_supported(reader, empty)?);
                }
                airsync::OPTIONS => {
                    if let Some(options) = decode_options(reader, features, empty)? {
                        collection
                            .options
                            .get_or_insert_with(CollectionOptions::default)
                            .merge_from(&options);
                    }
                }
                airsync::COMMANDS => {
                    let class = collection.class.unwrap_or(CollectionClass::Email);
                    collection.commands = decode_commands(reader, class, features, empty)?;
                }
                _ => reader.skip_element(empty)?,
            }
        }

        collection.id = match id {
            Some(id) if !id.is_empty() => id,
            _ => return Err(ProtocolError::MissingElement("CollectionId")),
        };
        if collection.supported.is_some() && collection.sync_key.as_deref() != Some("0") {
            return Err(ProtocolError::malformed(
                "Supported is only allowed with sync key 0",
            ));
        }
        Ok(collection)
    }

    fn encode(&self, writer: &mut EventWriter, features: VersionFeatures) -> CodecResult<()> {
        writer.start(airsync::COLLECTION);
        if let Some(class) = self.class {
            writer.leaf(airsync::CLASS, class.as_str());
        }
        if let Some(key) = &self.sync_key {
            writer.leaf(airsync::SYNC_KEY, key.clone());
        }
        writer.leaf(airsync::COLLECTION_ID, self.id.clone());
        if let Some(supported) = &self.supported {
            match supported {
                SupportedFields::All => writer.empty(airsync::SUPPORTED),
                SupportedFields::Only(tags) => {
                    writer.start(airsync::SUPPORTED);
                    for tag in tags {
                        writer.empty(*tag);
                    }
                    writer.end()?;
                }
            }
        }
        if let Some(flag) = self.deletes_as_moves {
            writer.leaf(airsync::DELETES_AS_MOVES, flag_text(flag));
        }
        if let Some(flag) = self.get_changes {
            writer.leaf(airsync::GET_CHANGES, flag_text(flag));
        }
        if let Some(size) = self.window_size {
            writer.leaf(airsync::WINDOW_SIZE, size.to_string());
        }
        if let Some(flag) = self.conversation_mode {
            writer.leaf(airsync::CONVERSATION_MODE, flag_text(flag));
        }
        if let Some(options) = &self.options {
            encode_options(writer, options, features)?;
        }
        if !self.commands.is_empty() {
            writer.start(airsync::COMMANDS);
            for command in &self.commands {
                encode_command(writer, command)?;
            }
            writer.end()?;
        }
        writer.end()
    }
}

/// A decoded Sync request.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SyncRequest {
    /// Collections in request order.
    pub collections: Vec<CollectionRequest>,
    /// Long-poll wait in minutes.
    pub wait: Option<u32>,
    /// Long-poll heartbeat in seconds.
    pub heartbeat_interval: Option<u32>,
    /// Global window, unclamped.
    pub window_size: Option<u32>,
    /// Merge with the cached collection set.
    pub partial: bool,
}

impl SyncRequest {
    /// Creates an empty request.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a collection.
    pub fn with_collection(mut self, collection: CollectionRequest) -> Self {
        self.collections.push(collection);
        self
    }

    /// Sets the heartbeat interval.
    pub fn with_heartbeat(mut self, seconds: u32) -> Self {
        self.heartbeat_interval = Some(seconds);
        self
    }

    /// Sets the wait interval.
    pub fn with_wait(mut self, minutes: u32) -> Self {
        self.wait = Some(minutes);
        self
    }

    /// Sets the global window.
    pub fn with_window_size(mut self, window_size: u32) -> Self {
        self.window_size = Some(window_size);
        self
    }

    /// Marks the request as partial.
    pub fn partial(mut self) -> Self {
        self.partial = true;
        self
    }

    /// Decodes a Sync request.
    ///
    /// Returns `None` for an empty request (no body, or an empty Sync
    /// element), which asks the server to replay the cached request.
    pub fn decode(
        reader: &mut EventReader,
        version: ProtocolVersion,
    ) -> ProtocolResult<Option<Self>> {
        if reader.is_empty() {
            return Ok(None);
        }
        if reader.expect_start(airsync::SYNC)? {
            return Ok(None);
        }

        let features = version.features();
        let mut request = SyncRequest::default();
        loop {
            let Some(tag) = reader.peek_start() else {
                reader.end_tag()?;
                break;
            };
            let empty = reader.expect_start(tag)?;
            match tag {
                airsync::COLLECTIONS => {
                    if empty {
                        continue;
                    }
                    while reader.start_tag(airsync::COLLECTION).is_some() {
                        request
                            .collections
                            .push(CollectionRequest::decode(reader, features)?);
                    }
                    reader.end_tag()?;
                }
                airsync::WAIT => {
                    request.wait = parse_interval("Wait", &reader.element_text(empty)?)?;
                }
                airsync::HEARTBEAT_INTERVAL => {
                    request.heartbeat_interval =
                        parse_interval("HeartbeatInterval", &reader.element_text(empty)?)?;
                }
                airsync::WINDOW_SIZE => {
                    let text = reader.element_text(empty)?;
                    request.window_size = Some(parse_number("WindowSize", &text)?);
                }
                airsync::PARTIAL => {
                    reader.element_text(empty)?;
                    request.partial = true;
                }
                _ => reader.skip_element(empty)?,
            }
        }
        Ok(Some(request))
    }

    /// Writes this request as an event stream.
    pub fn encode(&self, writer: &mut EventWriter, version: ProtocolVersion) -> CodecResult<()> {
        let features = version.features();
        writer.start(airsync::SYNC);
        if !self.collections.is_empty() {
            writer.start(airsync::COLLECTIONS);
            for collection in &self.collections {
                collection.encode(writer, features)?;
            }
            writer.end()?;
        }
        if let Some(wait) = self.wait {
            writer.leaf(airsync::WAIT, wait.to_string());
        }
        if let Some(heartbeat) = self.heartbeat_interval {
            writer.leaf(airsync::HEARTBEAT_INTERVAL, heartbeat.to_string());
        }
        if let Some(size) = self.window_size {
            writer.leaf(airsync::WINDOW_SIZE, size.to_string());
        }
        if self.partial {
            writer.empty(airsync::PARTIAL);
        }
        writer.end()
    }

    /// Encodes this request into a reader, as a device would send it.
    pub fn to_reader(&self, version: ProtocolVersion) -> CodecResult<EventReader> {
        let mut writer = EventWriter::new();
        self.encode(&mut writer, version)?;
        Ok(EventReader::new(writer.finish()?))
    }
}

fn parse_number(element: &'static str, text: &str) -> ProtocolResult<u32> {
    text.trim()
        .parse()
        .map_err(|_| ProtocolError::invalid_value(element, text))
}

// A zero or empty interval counts as not sent.
fn parse_interval(element: &'static str, text: &str) -> ProtocolResult<Option<u32>> {
    if text.trim().is_empty() {
        return Ok(None);
    }
    let value = parse_number(element, text)?;
    Ok((value > 0).then_some(value))
}

fn parse_flag(text: &str) -> bool {
    text.trim() != "0"
}

fn flag_text(flag: bool) -> &'static str {
    if flag {
        "1"
    } else {
        "0"
    }
}

fn decode_supported(reader: &mut EventReader, empty: bool) -> ProtocolResult<SupportedFields> {
    let mut tags = Vec::new();
    if !empty {
        loop {
            match reader.next_event()? {
                Event::End => break,
                Event::Start { tag, empty } => {
                    tags.push(tag);
                    reader.skip_element(empty)?;
                }
                Event::Content(_) => {}
            }
        }
    }
    Ok(SupportedFields::from_tags(tags))
}

fn decode_body_preference(reader: &mut EventReader, empty: bool) -> ProtocolResult<BodyPreference> {
    let mut preference = BodyPreference::new(1);
    if empty {
        return Ok(preference);
    }
    loop {
        let Some(tag) = reader.peek_start() else {
            reader.end_tag()?;
            return Ok(preference);
        };
        let empty = reader.expect_start(tag)?;
        match tag {
            airsyncbase::TYPE => {
                let text = reader.element_text(empty)?;
                preference.body_type = text
                    .trim()
                    .parse()
                    .map_err(|_| ProtocolError::invalid_value("Type", text.as_str()))?;
            }
            airsyncbase::TRUNCATION_SIZE => {
                let text = reader.element_text(empty)?;
                preference.truncation_size = Some(parse_number("TruncationSize", &text)?);
            }
            airsyncbase::ALL_OR_NONE => {
                preference.all_or_none = parse_flag(&reader.element_text(empty)?);
            }
            airsyncbase::PREVIEW => {
                let text = reader.element_text(empty)?;
                preference.preview = Some(parse_number("Preview", &text)?);
            }
            _ => reader.skip_element(empty)?,
        }
    }
}

fn small_number(element: &'static str, text: &str) -> ProtocolResult<u8> {
    text.trim()
        .parse()
        .map_err(|_| ProtocolError::invalid_value(element, text))
}

/// Returns `None` for option blocks addressed to the SMS class, which are
/// accepted but not used.
fn decode_options(
    reader: &mut EventReader,
    features: VersionFeatures,
    empty: bool,
) -> ProtocolResult<Option<CollectionOptions>> {
    let mut options = CollectionOptions::default();
    let mut sms = false;
    if empty {
        return Ok(Some(options));
    }
    loop {
        let Some(tag) = reader.peek_start() else {
            reader.end_tag()?;
            break;
        };
        let empty = reader.expect_start(tag)?;
        match tag {
            airsync::CLASS => {
                sms = CollectionClass::parse(&reader.element_text(empty)?)? == CollectionClass::Sms;
            }
            airsync::FILTER_TYPE => {
                options.filter_type = Some(FilterType::parse(&reader.element_text(empty)?)?);
            }
            airsync::CONFLICT => {
                options.conflict = Some(ConflictPolicy::parse(&reader.element_text(empty)?)?);
            }
            airsync::TRUNCATION => {
                options.truncation = Some(small_number("Truncation", &reader.element_text(empty)?)?);
            }
            airsync::RTF_TRUNCATION => {
                options.rtf_truncation =
                    Some(small_number("RTFTruncation", &reader.element_text(empty)?)?);
            }
            airsync::MIME_SUPPORT => {
                options.mime_support =
                    Some(small_number("MIMESupport", &reader.element_text(empty)?)?);
            }
            airsync::MIME_TRUNCATION => {
                options.mime_truncation =
                    Some(small_number("MIMETruncation", &reader.element_text(empty)?)?);
            }
            airsync::MAX_ITEMS => {
                let text = reader.element_text(empty)?;
                options.max_items = Some(parse_number("MaxItems", &text)?);
            }
            airsyncbase::BODY_PREFERENCE => {
                options
                    .body_preferences
                    .push(decode_body_preference(reader, empty)?);
            }
            airsyncbase::BODY_PART_PREFERENCE if features.body_part_preference => {
                options
                    .body_part_preferences
                    .push(decode_body_preference(reader, empty)?);
            }
            rights_management::RIGHTS_MANAGEMENT_SUPPORT if features.rights_management => {
                options.rights_management = Some(parse_flag(&reader.element_text(empty)?));
            }
            _ => reader.skip_element(empty)?,
        }
    }
    Ok((!sms).then_some(options))
}

fn encode_options(
    writer: &mut EventWriter,
    options: &CollectionOptions,
    features: VersionFeatures,
) -> CodecResult<()> {
    writer.start(airsync::OPTIONS);
    if let Some(filter) = options.filter_type {
        writer.leaf(airsync::FILTER_TYPE, filter.value().to_string());
    }
    if let Some(conflict) = options.conflict {
        writer.leaf(airsync::CONFLICT, conflict.code().to_string());
    }
    let numbers = [
        (airsync::TRUNCATION, options.truncation),
        (airsync::RTF_TRUNCATION, options.rtf_truncation),
        (airsync::MIME_SUPPORT, options.mime_support),
        (airsync::MIME_TRUNCATION, options.mime_truncation),
    ];
    for (tag, value) in numbers {
        if let Some(value) = value {
            writer.leaf(tag, value.to_string());
        }
    }
    if let Some(max) = options.max_items {
        writer.leaf(airsync::MAX_ITEMS, max.to_string());
    }
    for preference in &options.body_preferences {
        encode_body_preference(writer, airsyncbase::BODY_PREFERENCE, preference)?;
    }
    if features.body_part_preference {
        for preference in &options.body_part_preferences {
            encode_body_preference(writer, airsyncbase::BODY_PART_PREFERENCE, preference)?;
        }
    }
    if let (Some(flag), true) = (options.rights_management, features.rights_management) {
        writer.leaf(
            rights_management::RIGHTS_MANAGEMENT_SUPPORT,
            flag_text(flag),
        );
    }
    writer.end()
}

fn encode_body_preference(
    writer: &mut EventWriter,
    tag: Tag,
    preference: &BodyPreference,
) -> CodecResult<()> {
    writer.start(tag);
    writer.leaf(airsyncbase::TYPE, preference.body_type.to_string());
    if let Some(size) = preference.truncation_size {
        writer.leaf(airsyncbase::TRUNCATION_SIZE, size.to_string());
    }
    if preference.all_or_none {
        writer.leaf(airsyncbase::ALL_OR_NONE, "1");
    }
    if let Some(preview) = preference.preview {
        writer.leaf(airsyncbase::PREVIEW, preview.to_string());
    }
    writer.end()
}

#[derive(Default)]
struct CommandFields {
    client_id: Option<String>,
    server_id: Option<String>,
    instance_id: Option<String>,
    class: Option<CollectionClass>,
    data: Option<ApplicationData>,
}

fn decode_command_fields(
    reader: &mut EventReader,
    class: CollectionClass,
    empty: bool,
) -> ProtocolResult<CommandFields> {
    let mut fields = CommandFields::default();
    if empty {
        return Ok(fields);
    }
    loop {
        let Some(tag) = reader.peek_start() else {
            reader.end_tag()?;
            return Ok(fields);
        };
        let empty = reader.expect_start(tag)?;
        match tag {
            airsync::CLIENT_ID => fields.client_id = Some(reader.element_text(empty)?),
            airsync::SERVER_ID => fields.server_id = Some(reader.element_text(empty)?),
            airsyncbase::INSTANCE_ID => fields.instance_id = Some(reader.element_text(empty)?),
            airsync::CLASS => {
                fields.class = Some(CollectionClass::parse(&reader.element_text(empty)?)?);
            }
            airsync::APPLICATION_DATA => {
                let item_class = fields.class.unwrap_or(class);
                fields.data = Some(ApplicationData::decode(reader, item_class, empty)?);
            }
            _ => reader.skip_element(empty)?,
        }
    }
}

fn decode_commands(
    reader: &mut EventReader,
    class: CollectionClass,
    features: VersionFeatures,
    empty: bool,
) -> ProtocolResult<Vec<Command>> {
    let mut commands = Vec::new();
    if empty {
        return Ok(commands);
    }
    loop {
        let Some(tag) = reader.peek_start() else {
            reader.end_tag()?;
            return Ok(commands);
        };
        let empty = reader.expect_start(tag)?;
        let fields = match tag {
            airsync::ADD | airsync::CHANGE | airsync::DELETE | airsync::FETCH => {
                decode_command_fields(reader, class, empty)?
            }
            _ => {
                reader.skip_element(empty)?;
                continue;
            }
        };
        let server_id = |element| fields.server_id.clone().ok_or(ProtocolError::MissingElement(element));
        let command = match tag {
            airsync::ADD => Command::Add {
                client_id: fields
                    .client_id
                    .clone()
                    .ok_or(ProtocolError::MissingElement("ClientId"))?,
                class: fields.class.filter(|_| features.class_in_add),
                data: fields
                    .data
                    .clone()
                    .unwrap_or_else(|| ApplicationData::new(fields.class.unwrap_or(class))),
            },
            airsync::CHANGE => Command::Modify {
                server_id: server_id("ServerId")?,
                instance_id: fields.instance_id.clone(),
                data: fields
                    .data
                    .clone()
                    .unwrap_or_else(|| ApplicationData::new(class)),
            },
            airsync::DELETE => Command::Remove {
                server_id: server_id("ServerId")?,
                instance_id: fields.instance_id.clone().filter(|_| features.instance_removal),
            },
            _ => Command::Fetch {
                server_id: server_id("ServerId")?,
            },
        };
        commands.push(command);
    }
}

fn encode_command(writer: &mut EventWriter, command: &Command) -> CodecResult<()> {
    match command {
        Command::Add {
            client_id,
            class,
            data,
        } => {
            writer.start(airsync::ADD);
            if let Some(class) = class {
                writer.leaf(airsync::CLASS, class.as_str());
            }
            writer.leaf(airsync::CLIENT_ID, client_id.clone());
            data.encode(writer)?;
        }
        Command::Modify {
            server_id,
            instance_id,
            data,
        } => {
            writer.start(airsync::CHANGE);
            writer.leaf(airsync::SERVER_ID, server_id.clone());
            if let Some(instance) = instance_id {
                writer.leaf(airsyncbase::INSTANCE_ID, instance.clone());
            }
            data.encode(writer)?;
        }
        Command::Remove {
            server_id,
            instance_id,
        } => {
            writer.start(airsync::DELETE);
            writer.leaf(airsync::SERVER_ID, server_id.clone());
            if let Some(instance) = instance_id {
                writer.leaf(airsyncbase::INSTANCE_ID, instance.clone());
            }
        }
        Command::Fetch { server_id } => {
            writer.start(airsync::FETCH);
            writer.leaf(airsync::SERVER_ID, server_id.clone());
        }
    }
    writer.end()
}
