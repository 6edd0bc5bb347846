use crate::EventLoop;

mod identify;
mod kad;
mod ping;

pub(crate) trait EventHandler<E> {
    async fn handle(&mut self, event: E);
}
