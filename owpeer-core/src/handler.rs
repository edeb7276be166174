//! Application callbacks for decoded objects
//!
//! The dispatcher calls exactly one method per object. Objects are lent, not
//! given: the dispatcher returns the object's pool slot once the call
//! returns, so a handler that wants to keep payload bytes must copy them.

use owpeer_protocol::{
    Button, Command, Data, Discover, Message, Midi, ObjectKind, Parameter, Reset,
};

/// Per-kind handlers; every method defaults to logging and ignoring
pub trait BusHandler {
    fn discover(&mut self, discover: &Discover) {
        let _ = discover;
        unhandled(ObjectKind::Discover);
    }

    fn reset(&mut self, reset: &Reset) {
        let _ = reset;
        unhandled(ObjectKind::Reset);
    }

    fn midi(&mut self, midi: &Midi) {
        debug!("Unhandled MIDI packet {:?}", midi.packet);
    }

    fn button(&mut self, button: &Button) {
        let _ = button;
        unhandled(ObjectKind::Button);
    }

    fn parameter(&mut self, parameter: &Parameter) {
        let _ = parameter;
        unhandled(ObjectKind::Parameter);
    }

    fn command(&mut self, command: &Command) {
        let _ = command;
        unhandled(ObjectKind::Command);
    }

    fn data(&mut self, data: &Data) {
        let _ = data;
        unhandled(ObjectKind::Data);
    }

    fn message(&mut self, message: &Message) {
        let _ = message;
        unhandled(ObjectKind::Message);
    }
}

fn unhandled(kind: ObjectKind) {
    debug!("Unhandled {:?} object", kind);
}

impl<H: BusHandler + ?Sized> BusHandler for &mut H {
    fn discover(&mut self, discover: &Discover) {
        (**self).discover(discover)
    }

    fn reset(&mut self, reset: &Reset) {
        (**self).reset(reset)
    }

    fn midi(&mut self, midi: &Midi) {
        (**self).midi(midi)
    }

    fn button(&mut self, button: &Button) {
        (**self).button(button)
    }

    fn parameter(&mut self, parameter: &Parameter) {
        (**self).parameter(parameter)
    }

    fn command(&mut self, command: &Command) {
        (**self).command(command)
    }

    fn data(&mut self, data: &Data) {
        (**self).data(data)
    }

    fn message(&mut self, message: &Message) {
        (**self).message(message)
    }
}
