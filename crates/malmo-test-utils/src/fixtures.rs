//! Mission templates and spaces shared across test suites.

use malmo_core::types::Space;

/// Single-agent mission with one `VideoProducer` of the given size.
pub fn mission_xml(width: u32, height: u32) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="no" ?>
<!-- navigate to the diamond block -->
<Mission xmlns="http://ProjectMalmo.microsoft.com" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">
  <About>
    <Summary>Navigate</Summary>
  </About>
  <ServerSection>
    <ServerHandlers>
      <FlatWorldGenerator generatorString="3;7,2;1;"/>
      <ServerQuitFromTimeUp timeLimitMs="60000"/>
    </ServerHandlers>
  </ServerSection>
  <AgentSection mode="Survival">
    <Name>MineRLAgent</Name>
    <AgentStart/>
    <AgentHandlers>
      <VideoProducer want_depth="false">
        <Width>{width}</Width>
        <Height>{height}</Height>
      </VideoProducer>
      <ObservationFromFullInventory flat="false"/>
    </AgentHandlers>
  </AgentSection>
</Mission>
"#
    )
}

/// Two-agent, turn-based mission. Each agent has its own `VideoProducer`.
pub fn two_agent_mission_xml(width: u32, height: u32) -> String {
    format!(
        r#"<Mission xmlns="http://ProjectMalmo.microsoft.com">
  <About><Summary>Duel</Summary></About>
  <ServerSection><ServerHandlers/></ServerSection>
  <AgentSection mode="Survival">
    <Name>first</Name>
    <AgentHandlers>
      <VideoProducer want_depth="true">
        <Width>{width}</Width>
        <Height>{height}</Height>
      </VideoProducer>
      <TurnBasedCommands/>
    </AgentHandlers>
  </AgentSection>
  <AgentSection mode="Survival">
    <Name>second</Name>
    <AgentHandlers>
      <VideoProducer>
        <Width>{width}</Width>
        <Height>{height}</Height>
      </VideoProducer>
      <TurnBasedCommands/>
    </AgentHandlers>
  </AgentSection>
</Mission>
"#
    )
}

/// Action space of a navigation task.
pub fn navigate_action_space() -> Space {
    Space::dict([
        ("forward", Space::enumeration(["0", "1"])),
        ("jump", Space::enumeration(["0", "1"])),
        ("place", Space::enumeration(["none", "dirt"])),
        ("camera", Space::boxed(-180.0, 180.0, &[2])),
    ])
}

/// Observation space of a navigation task: frame, inventory and compass.
pub fn navigate_observation_space(width: u32, height: u32) -> Space {
    Space::dict([
        (
            "pov",
            Space::boxed(0.0, 255.0, &[height as usize, width as usize, 3]),
        ),
        (
            "inventory",
            Space::dict([("dirt", Space::count(2304.0)), ("log", Space::count(2304.0))]),
        ),
        (
            "compassAngle",
            Space::boxed(-180.0, 180.0, &[]),
        ),
    ])
}
