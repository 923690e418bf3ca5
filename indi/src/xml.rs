//! Incremental XML stream handling
//!
//! An INDI server sends a sequence of sibling elements rather than one
//! document, and a single element may be split across any number of socket
//! reads. [`StreamParser`] reads quick-xml events from the buffered bytes,
//! counts depth on start and end tags and cuts the buffer whenever depth
//! returns to zero. An event cut short by the end of the buffer is read
//! again once more bytes arrive. Each complete top-level slice is then
//! parsed into an owned [`XmlElement`] tree.

use crate::error::{IndiError, IndiResult};
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

/// Owned XML element
#[derive(Debug, Clone, PartialEq, Default)]
pub struct XmlElement {
    pub tag: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<XmlElement>,
    /// Concatenated character data directly inside this element
    pub text: String,
}

impl XmlElement {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            ..Default::default()
        }
    }

    /// Attribute value, if present
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Attribute value, `None` if absent or empty
    pub fn attr_nonempty(&self, name: &str) -> Option<&str> {
        self.attr(name).filter(|v| !v.is_empty())
    }

    /// Children with the given tag
    pub fn children_named<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = &'a XmlElement> {
        self.children.iter().filter(move |c| c.tag == tag)
    }

    /// Parse a single complete element from `bytes`
    pub fn parse(bytes: &[u8]) -> IndiResult<XmlElement> {
        let mut reader = Reader::from_reader(bytes);
        let mut stack: Vec<XmlElement> = Vec::new();

        loop {
            let event = reader
                .read_event()
                .map_err(|e| IndiError::ParseError(format!("{} at byte {}", e, reader.buffer_position())))?;
            match event {
                Event::Start(e) => stack.push(start_element(&e)?),
                Event::Empty(e) => {
                    let elem = start_element(&e)?;
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(elem),
                        None => return Ok(elem),
                    }
                }
                Event::End(_) => {
                    let elem = stack
                        .pop()
                        .ok_or_else(|| IndiError::ParseError("unbalanced end tag".to_string()))?;
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(elem),
                        None => return Ok(elem),
                    }
                }
                Event::Text(t) => {
                    if let Some(current) = stack.last_mut() {
                        let text = t
                            .unescape()
                            .map_err(|e| IndiError::ParseError(e.to_string()))?;
                        current.text.push_str(&text);
                    }
                }
                Event::CData(t) => {
                    if let Some(current) = stack.last_mut() {
                        current.text.push_str(&String::from_utf8_lossy(&t));
                    }
                }
                Event::Eof => {
                    return Err(IndiError::ParseError("incomplete element".to_string()));
                }
                _ => {}
            }
        }
    }
}

fn start_element(e: &BytesStart) -> IndiResult<XmlElement> {
    let mut elem = XmlElement::new(&String::from_utf8_lossy(e.name().as_ref()));
    for attr in e.attributes() {
        let attr = attr.map_err(|e| IndiError::ParseError(e.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
        let value = attr
            .unescape_value()
            .map_err(|e| IndiError::ParseError(e.to_string()))?
            .to_string();
        elem.attributes.push((key, value));
    }
    Ok(elem)
}

/// What one quick-xml event means for element nesting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    Open,
    Close,
    SelfClosed,
    /// Character data, which may stop short at the end of the buffer
    Text,
    /// Comments, CDATA, declarations and processing instructions
    Other,
}

/// Read the next event from `bytes`. Returns the token and the number of
/// bytes it spans, or `None` when the event is not complete yet.
fn next_token(bytes: &[u8]) -> Result<Option<(Token, usize)>, quick_xml::Error> {
    let mut reader = Reader::from_reader(bytes);
    // names are checked again when the whole element is parsed
    reader.check_end_names(false);
    let token = match reader.read_event() {
        Ok(Event::Eof) | Err(quick_xml::Error::UnexpectedEof(_)) => return Ok(None),
        Ok(Event::Start(_)) => Token::Open,
        Ok(Event::End(_)) => Token::Close,
        Ok(Event::Empty(_)) => Token::SelfClosed,
        Ok(Event::Text(_)) => Token::Text,
        Ok(_) => Token::Other,
        Err(e) => return Err(e),
    };
    let len = reader.buffer_position();
    // `</x` and `<?x` are read up to the end of input when `>` is missing
    if token != Token::Text && bytes.get(len.wrapping_sub(1)) != Some(&b'>') {
        return Ok(None);
    }
    Ok(Some((token, len)))
}

/// Splits a byte stream into complete top-level elements
#[derive(Debug, Default)]
pub struct StreamParser {
    buf: Vec<u8>,
    /// Offset in `buf` of the next event to read
    resume: usize,
    /// Start of the element currently being received
    start: Option<usize>,
    depth: usize,
}

impl StreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current element nesting depth
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Bytes held for an element that has not completed yet
    pub fn pending_bytes(&self) -> usize {
        self.buf.len()
    }

    /// Drop any partially received element
    pub fn clear(&mut self) {
        self.buf.clear();
        self.resume = 0;
        self.start = None;
        self.depth = 0;
    }

    /// Feed newly received bytes and return every top-level element they
    /// complete, in arrival order. Elements that fail to parse are logged
    /// and skipped.
    pub fn feed(&mut self, data: &[u8]) -> Vec<XmlElement> {
        self.buf.extend_from_slice(data);
        let mut complete = Vec::new();

        while self.resume < self.buf.len() {
            let at = self.resume;
            match next_token(&self.buf[at..]) {
                Ok(Some((token, len))) => {
                    self.resume = at + len;
                    self.apply(token, at, &mut complete);
                }
                Ok(None) => break,
                Err(e) => self.skip_malformed(at, e),
            }
        }

        // keep only the unfinished tail
        let keep_from = self.start.unwrap_or(self.resume);
        if keep_from > 0 {
            self.buf.drain(..keep_from);
            self.resume -= keep_from;
            if let Some(start) = self.start.as_mut() {
                *start -= keep_from;
            }
        }

        complete
    }

    fn apply(&mut self, token: Token, at: usize, out: &mut Vec<XmlElement>) {
        match token {
            Token::Open => {
                if self.depth == 0 {
                    self.start = Some(at);
                }
                self.depth += 1;
            }
            Token::SelfClosed if self.depth == 0 => {
                self.start = Some(at);
                self.emit(out);
            }
            Token::Close => match self.depth {
                0 => tracing::warn!("Unbalanced end tag in INDI stream, discarding"),
                1 => {
                    self.depth = 0;
                    self.emit(out);
                }
                _ => self.depth -= 1,
            },
            Token::Text if self.depth == 0 => {
                let text = &self.buf[at..self.resume];
                if !text.iter().all(u8::is_ascii_whitespace) {
                    tracing::debug!("Ignoring stray character data between INDI messages");
                }
            }
            Token::SelfClosed | Token::Text | Token::Other => {}
        }
    }

    /// Drop the element being received and resume after the next `>`
    fn skip_malformed(&mut self, at: usize, error: quick_xml::Error) {
        tracing::error!("Dropping malformed INDI message: {}", error);
        self.resume = self.buf[at..]
            .iter()
            .position(|b| *b == b'>')
            .map_or(self.buf.len(), |i| at + i + 1);
        self.start = None;
        self.depth = 0;
    }

    fn emit(&mut self, out: &mut Vec<XmlElement>) {
        let Some(start) = self.start.take() else {
            return;
        };
        let slice = &self.buf[start..self.resume];
        match XmlElement::parse(slice) {
            Ok(elem) => out.push(elem),
            Err(e) => tracing::error!(
                "Dropping malformed INDI message: {}. Raw (first 200 bytes): {:?}",
                e,
                String::from_utf8_lossy(&slice[..slice.len().min(200)])
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEF_NUMBER: &str = r#"<defNumberVector device="Telescope" name="EQUATORIAL_EOD_COORD" label="Eq. Coordinates" group="Main Control" state="Idle" perm="rw" timeout="60">
    <defNumber name="RA" label="RA (hh:mm:ss)" format="%10.6m" min="0" max="24" step="0">12.5</defNumber>
    <defNumber name="DEC" label="DEC (dd:mm:ss)" format="%10.6m" min="-90" max="90" step="0">-45.25</defNumber>
</defNumberVector>"#;

    #[test]
    fn test_parse_element_tree() {
        let elem = XmlElement::parse(DEF_NUMBER.as_bytes()).unwrap();
        assert_eq!(elem.tag, "defNumberVector");
        assert_eq!(elem.attr("device"), Some("Telescope"));
        assert_eq!(elem.attr("missing"), None);
        assert_eq!(elem.children.len(), 2);
        let ra = &elem.children[0];
        assert_eq!(ra.attr("format"), Some("%10.6m"));
        assert_eq!(ra.text.trim(), "12.5");
        assert_eq!(elem.children_named("defNumber").count(), 2);
    }

    #[test]
    fn test_parse_unescapes() {
        let elem = XmlElement::parse(
            br#"<message device="Dome" message="Shutter &lt;open&gt; &amp; ready"/>"#,
        )
        .unwrap();
        assert_eq!(elem.attr("message"), Some("Shutter <open> & ready"));
    }

    #[test]
    fn test_feed_single_message() {
        let mut parser = StreamParser::new();
        let out = parser.feed(DEF_NUMBER.as_bytes());
        assert_eq!(out.len(), 1);
        assert_eq!(parser.depth(), 0);
        assert_eq!(parser.pending_bytes(), 0);
    }

    #[test]
    fn test_feed_split_at_every_byte() {
        let mut parser = StreamParser::new();
        let mut out = Vec::new();
        for b in DEF_NUMBER.as_bytes() {
            out.extend(parser.feed(std::slice::from_ref(b)));
        }
        assert_eq!(out.len(), 1);
        assert_eq!(out[0], XmlElement::parse(DEF_NUMBER.as_bytes()).unwrap());
    }

    #[test]
    fn test_feed_three_chunks_matches_one() {
        let bytes = DEF_NUMBER.as_bytes();
        let mut whole = StreamParser::new();
        let expected = whole.feed(bytes);

        let mut split = StreamParser::new();
        let mut out = Vec::new();
        out.extend(split.feed(&bytes[..17]));
        assert!(out.is_empty());
        assert!(split.pending_bytes() > 0);
        out.extend(split.feed(&bytes[17..150]));
        assert!(out.is_empty());
        out.extend(split.feed(&bytes[150..]));
        assert_eq!(out, expected);
    }

    #[test]
    fn test_feed_sibling_messages_in_one_read() {
        let mut parser = StreamParser::new();
        let data = concat!(
            r#"<delProperty device="CCD Simulator" name="CCD1"/>"#,
            "\n",
            r#"<message device="CCD Simulator" timestamp="2024-01-01T00:00:00" message="hello"/>"#,
            r#"<setSwitchVector device="CCD Simulator" name="CONNECTION" state="Ok">"#,
            r#"<oneSwitch name="CONNECT">On</oneSwitch>"#,
        );
        let out = parser.feed(data.as_bytes());
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].tag, "delProperty");
        assert_eq!(out[1].tag, "message");
        assert_eq!(parser.depth(), 1);

        let out = parser.feed(b"<oneSwitch name=\"DISCONNECT\">Off</oneSwitch></setSwitchVector>");
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].children.len(), 2);
    }

    #[test]
    fn test_feed_gt_inside_attribute() {
        let mut parser = StreamParser::new();
        let out = parser.feed(br#"<message device="Mount" message="alt > 80 deg"/>"#);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].attr("message"), Some("alt > 80 deg"));
    }

    #[test]
    fn test_feed_skips_declarations_and_comments() {
        let mut parser = StreamParser::new();
        let out = parser.feed(
            br#"<?xml version="1.0"?><!-- a -> b --><getProperties version="1.7"/>"#,
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].tag, "getProperties");
    }

    #[test]
    fn test_malformed_message_is_dropped() {
        let mut parser = StreamParser::new();
        let out = parser.feed(b"<setTextVector device=\"A\" name=\"B\"><oneText></wrong></setTextVector>");
        assert!(out.is_empty());
        assert_eq!(parser.depth(), 0);

        let out = parser.feed(br#"<getProperties version="1.7"/>"#);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_feed_cdata_with_markup() {
        let mut parser = StreamParser::new();
        let data = concat!(
            r#"<setTextVector device="A" name="B"><oneText name="C"><![CDATA[x > 1 <y>]]></oneText></setTextVector>"#,
            r#"<getProperties version="1.7"/>"#,
        );
        let out = parser.feed(data.as_bytes());
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].children[0].text, "x > 1 <y>");
        assert_eq!(out[1].tag, "getProperties");
        assert_eq!(parser.depth(), 0);
        assert_eq!(parser.pending_bytes(), 0);

        let out = parser.feed(br#"<message message="still reading"/>"#);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_feed_cdata_split_across_reads() {
        let data = br#"<setTextVector device="A" name="B"><oneText name="C"><![CDATA[a > <b> </c>]]></oneText></setTextVector>"#;
        let mut parser = StreamParser::new();
        let mut out = Vec::new();
        for chunk in data.chunks(7) {
            out.extend(parser.feed(chunk));
        }
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].children[0].text, "a > <b> </c>");
    }

    #[test]
    fn test_feed_waits_for_closing_bracket() {
        let mut parser = StreamParser::new();
        assert!(parser.feed(br#"<?xml version="1.0"?"#).is_empty());
        assert!(parser.feed(b"><delProperty device=\"A\"></delProperty").is_empty());
        assert_eq!(parser.depth(), 1);
        let out = parser.feed(b">");
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].tag, "delProperty");
        assert_eq!(parser.depth(), 0);
    }

    #[test]
    fn test_clear_discards_partial_message() {
        let mut parser = StreamParser::new();
        parser.feed(b"<defTextVector device=\"A\" name=\"B\"><defText name=\"C\">par");
        assert!(parser.pending_bytes() > 0);
        parser.clear();
        assert_eq!(parser.pending_bytes(), 0);
        assert_eq!(parser.depth(), 0);
        let out = parser.feed(br#"<getProperties version="1.7"/>"#);
        assert_eq!(out.len(), 1);
    }
}
