// Event types and codes used by the daemon (see [input-event-codes.h] and the [kernel docs]).
//
// [input-event-codes.h]: https://elixir.bootlin.com/linux/v5.19.17/source/include/uapi/linux/input-event-codes.h#L38
// [kernel docs]: https://www.kernel.org/doc/html/latest/input/event-codes.html
pub(crate) const EV_SYN: u16 = 0x00;
pub(crate) const EV_KEY: u16 = 0x01;

/// Marks the end of a packet of events.
pub(crate) const SYN_REPORT: u16 = 0;
/// The kernel's event buffer overflowed and events were lost.
pub(crate) const SYN_DROPPED: u16 = 3;

/// The `value` of an EV_KEY caused by a key being released.
pub(crate) const EV_KEY_RELEASE: i32 = 0;
/// The `value` of an EV_KEY caused by a key press.
pub(crate) const EV_KEY_PRESS: i32 = 1;
/// The `value` of an EV_KEY caused by a key being held down.
pub(crate) const EV_KEY_REPEAT: i32 = 2;
