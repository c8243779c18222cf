//! TwiML scripts served to Twilio during voice calls

use anyhow::Result;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

const INTRO: &str = "This is the escalation service with a message for you.";
const PRESS_ANY_KEY: &str = "Press any key to acknowledge receipt of this message";
const ACKNOWLEDGED: &str = "Thank you. This message has been acknowledged. Goodbye!";

/// Seconds Twilio waits for a key press
const GATHER_TIMEOUT: &str = "15";

/// Script read to the recipient: an intro, then the message and a prompt
/// inside a `<Gather>` that posts the pressed key to `gather_action`.
pub fn notify_script(message: &str, gather_action: &str) -> Result<String> {
    let mut w = Script::new()?;
    w.say("woman", INTRO)?;

    let mut gather = BytesStart::new("Gather");
    gather.push_attribute(("action", gather_action));
    gather.push_attribute(("timeout", GATHER_TIMEOUT));
    gather.push_attribute(("numDigits", "1"));
    w.open(gather)?;
    w.say("man", message)?;
    w.say("woman", PRESS_ANY_KEY)?;
    w.close("Gather")?;

    w.finish()
}

/// Wrap-up played once the call has been acknowledged
pub fn acknowledged_script() -> Result<String> {
    let mut w = Script::new()?;
    w.say("woman", ACKNOWLEDGED)?;
    w.finish()
}

/// A `<Response>` document under construction
struct Script {
    writer: Writer<Vec<u8>>,
}

impl Script {
    fn new() -> Result<Self> {
        let mut writer = Writer::new(Vec::new());
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        writer.write_event(Event::Start(BytesStart::new("Response")))?;
        Ok(Self { writer })
    }

    fn open(&mut self, element: BytesStart<'_>) -> Result<()> {
        self.writer.write_event(Event::Start(element))?;
        Ok(())
    }

    fn close(&mut self, name: &str) -> Result<()> {
        self.writer.write_event(Event::End(BytesEnd::new(name)))?;
        Ok(())
    }

    fn say(&mut self, voice: &str, text: &str) -> Result<()> {
        let mut say = BytesStart::new("Say");
        say.push_attribute(("voice", voice));
        self.open(say)?;
        self.writer.write_event(Event::Text(BytesText::new(text)))?;
        self.close("Say")
    }

    fn finish(mut self) -> Result<String> {
        self.close("Response")?;
        Ok(String::from_utf8(self.writer.into_inner())?)
    }
}
