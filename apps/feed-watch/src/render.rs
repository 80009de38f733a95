use feed_sync::protocol::ReactionType;
use feed_sync::{CacheEvent, SyncEngine, View};

/// Whether `event` changes what `view` shows.
pub fn concerns(view: &View, event: &CacheEvent) -> bool {
    match event {
        CacheEvent::PartitionChanged(key) | CacheEvent::PartitionReset(key) => {
            view.partition().as_ref() == Some(key)
        }
        CacheEvent::ReactionsChanged(key) => matches!(view, View::Reactions(target) if target == key),
    }
}

pub fn print_view(engine: &SyncEngine, view: &View) {
    match view {
        View::Feed(scope) => {
            let requests = engine.requests(*scope);
            println!("── {scope:?} feed ({} requests) ──", requests.len());
            for request in requests {
                let edit = if request.editable_by_viewer { " (yours)" } else { "" };
                println!(
                    "{}  {:<12} {}{}  [{}]",
                    request.created_at.format("%Y-%m-%d %H:%M"),
                    request.author,
                    request.body,
                    edit,
                    request.id
                );
            }
        }
        View::Request(request_id) => {
            let responses = engine.responses(request_id);
            println!("── responses to {request_id} ({}) ──", responses.len());
            for response in responses {
                println!(
                    "{}  {:<12} {}  [{}]",
                    response.created_at.format("%Y-%m-%d %H:%M"),
                    response.author,
                    response.body,
                    response.id
                );
            }
        }
        View::Reactions(target) => {
            let summary = engine.reaction_summary(target);
            let line: Vec<String> = ReactionType::KNOWN
                .iter()
                .map(|kind| format!("{} {}", kind.glyph(), summary.count(kind)))
                .collect();
            println!("── reactions on {target} ──");
            println!("{}", line.join("  "));
            let others: usize = summary
                .counts
                .iter()
                .filter(|(kind, _)| matches!(kind, ReactionType::Other(_)))
                .map(|(_, count)| count)
                .sum();
            if others > 0 {
                println!("+{others} of other kinds");
            }
            if let Some(mine) = summary.mine {
                println!("you reacted with {}", mine.reaction_type);
            }
        }
    }
}
