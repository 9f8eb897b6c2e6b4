mod cli_commands;
