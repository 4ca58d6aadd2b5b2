use crate::cmd::{Context, progress};
use crate::error::{EduSyncError, Result};
use crate::helpdesk::Inventory;
use crate::reconcile::rooms::{BuildingMap, resolve_room, room_name_matches};
use clap::{Args, Subcommand};
use colored::Colorize;

#[derive(Subcommand, Debug)]
pub enum RoomsCommands {
    /// Show which helpdesk room a building code and room number resolve to
    Resolve(ResolveArgs),
}

#[derive(Args, Debug)]
pub struct ResolveArgs {
    /// Building code, e.g. CHS
    pub building: String,

    /// Room number, e.g. 101
    pub room: String,
}

pub async fn resolve(ctx: &Context, args: ResolveArgs) -> Result<()> {
    let buildings = BuildingMap::new(&ctx.config.buildings);
    let building = buildings
        .resolve(&args.building)
        .ok_or_else(|| EduSyncError::not_found("Building code", &args.building))?;

    let helpdesk = ctx.helpdesk()?;
    let spinner = progress::create_spinner("Loading helpdesk rooms...");
    let rooms = match helpdesk.list_rooms().await {
        Ok(rooms) => {
            progress::finish_spinner_success(&spinner, &format!("{} rooms loaded", rooms.len()));
            rooms
        }
        Err(e) => {
            progress::finish_spinner_error(&spinner, "Could not load rooms");
            return Err(e);
        }
    };

    println!("\n{} {} -> {}", "→".cyan(), args.building.to_uppercase(), building.bold());

    let candidates: Vec<_> = rooms
        .iter()
        .filter(|r| r.building == building && room_name_matches(&r.name, &args.room))
        .collect();
    for room in &candidates {
        println!(
            "  {} {:<30} {}{}",
            "•".cyan(),
            room.name,
            room.room_id,
            if room.is_active { "" } else { " (inactive)" }
        );
    }

    match resolve_room(&args.building, &args.room, &rooms, &buildings) {
        Some(room) => {
            println!(
                "\n{} Room {} resolves to '{}' ({})",
                "✓".green().bold(),
                args.room,
                room.name,
                room.room_id
            );
            Ok(())
        }
        None => Err(EduSyncError::not_found(
            "Room",
            format!("{} {}", args.building, args.room),
        )),
    }
}
