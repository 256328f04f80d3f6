// Communication channels lock-free

use crate::messaging::command::Command;
use crate::messaging::notification::Notification;
use ringbuf::{HeapRb, traits::Split};

pub type CommandProducer = ringbuf::HeapProd<Command>;
pub type CommandConsumer = ringbuf::HeapCons<Command>;

/// Control thread → sequencer
pub fn create_command_channel(capacity: usize) -> (CommandProducer, CommandConsumer) {
    let rb = HeapRb::<Command>::new(capacity);
    rb.split()
}

pub type NotificationProducer = ringbuf::HeapProd<Notification>;
pub type NotificationConsumer = ringbuf::HeapCons<Notification>;

/// Sequencer → UI/monitor thread
pub fn create_notification_channel(
    capacity: usize,
) -> (NotificationProducer, NotificationConsumer) {
    let rb = HeapRb::<Notification>::new(capacity);
    rb.split()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::notification::NotificationKind;
    use ringbuf::traits::{Consumer, Producer};

    #[test]
    fn test_command_channel() {
        let (mut tx, mut rx) = create_command_channel(2);
        assert!(tx.try_push(Command::Start).is_ok());
        assert!(tx.try_push(Command::GoToTime(480)).is_ok());
        // Full
        assert!(tx.try_push(Command::Stop).is_err());

        assert_eq!(rx.try_pop(), Some(Command::Start));
        assert_eq!(rx.try_pop(), Some(Command::GoToTime(480)));
        assert_eq!(rx.try_pop(), None);
    }

    #[test]
    fn test_notification_channel() {
        let (mut tx, mut rx) = create_notification_channel(4);
        tx.try_push(Notification::new(NotificationKind::Start, 0))
            .unwrap();
        assert_eq!(rx.try_pop().map(|n| n.kind), Some(NotificationKind::Start));
    }
}
